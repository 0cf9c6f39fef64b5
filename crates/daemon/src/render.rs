//! HTML fragments for directory pages and error responses.
//!
//! Every function appends to a caller-owned buffer so producers can emit a
//! page piecewise across reactor turns.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime};

use listing::Entry;
use listing::classify::OCTET_STREAM;
use percent_encoding::{AsciiSet, CONTROLS, percent_encode};
use time::OffsetDateTime;

use crate::status::ErrorStatus;
use crate::style::ListingStyle;

/// Names longer than this are shortened in listings.
pub const MAX_NAME_LEN: usize = 30;

/// Entries older than this show the year instead of the time of day.
pub const RECENT_WINDOW: Duration = Duration::from_secs(15_811_200);

const DOCTYPE: &str = "<!DOCTYPE HTML PUBLIC '-//W3C//DTD HTML 4.01 Transitional//EN'>\n";

const LEADER_DOTS: &str = ".. .. .. .. .. .. .. .. .. .. .. .. .. .. .. .. ..";

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Bytes escaped in link targets.
const LINK: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Escapes the HTML special characters of `text`.
pub fn html_escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Percent-escapes a raw path for use inside a link.
pub fn uri_escape(path: &[u8]) -> String {
    percent_encode(path, LINK).to_string()
}

/// A path escaped for a quoted HTML attribute.
fn link_target(path: &[u8]) -> String {
    html_escape(&uri_escape(path)).into_owned()
}

fn push(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(text.as_bytes());
}

/// Where a directory page lives and how it links elsewhere.
#[derive(Clone, Copy, Debug)]
pub struct PageContext<'a> {
    /// Scheme of the listed container.
    pub scheme: &'a str,
    /// Directory path, ending in `/`.
    pub directory: &'a [u8],
    /// Scheme used for the parent link.
    pub parent_scheme: &'a str,
    /// Pseudo-url that flips the listing style.
    pub toggle_url: &'a str,
    /// Style the page is rendered in.
    pub style: ListingStyle,
}

impl PageContext<'_> {
    fn directory_text(&self) -> Cow<'_, str> {
        OsStr::from_bytes(self.directory).to_string_lossy()
    }

    /// The parent of [`directory`](Self::directory), `None` at the root.
    pub fn parent(&self) -> Option<&[u8]> {
        if self.directory == b"/" {
            return None;
        }
        let trimmed = self.directory.strip_suffix(b"/").unwrap_or(self.directory);
        let slash = trimmed.iter().rposition(|&byte| byte == b'/')?;
        Some(&trimmed[..=slash])
    }
}

/// Document head, title and heading.
pub fn page_header(out: &mut Vec<u8>, page: &PageContext<'_>) {
    let base = link_target(page.directory);
    let title = page.directory_text();
    let title = html_escape(&title);
    push(out, DOCTYPE);
    push(
        out,
        &format!(
            "<HTML>\n<HEAD>\n <BASE href='{scheme}:{base}'>\n <TITLE>{scheme}:{title}</TITLE>\n</HEAD>\n<BODY><H1>Directory listing of {title}</H1>\n",
            scheme = page.scheme,
        ),
    );
    if page.style.is_plain() {
        push(out, "<pre>\n");
    }
}

/// Link to the parent directory, omitted for `/`.
pub fn parent_link(out: &mut Vec<u8>, page: &PageContext<'_>) {
    if let Some(parent) = page.parent() {
        push(
            out,
            &format!(
                "<a href='{}:{}'>Parent directory</a>",
                page.parent_scheme,
                link_target(parent)
            ),
        );
    }
}

/// The style toggle affordance.
pub fn toggle_link(out: &mut Vec<u8>, page: &PageContext<'_>) {
    push(
        out,
        &format!("&nbsp;&nbsp;<a href='{}'>%</a>\n", page.toggle_url),
    );
}

/// Column headings, or a note that there is nothing to list.
pub fn table_header(out: &mut Vec<u8>, entries: usize, style: ListingStyle) {
    if entries == 0 {
        push(out, "<br><br>Directory is empty.");
        return;
    }
    match style {
        ListingStyle::Plain => push(out, "\n\n"),
        ListingStyle::Table => push(
            out,
            "<br><br>\n\
             <table border=0 cellpadding=1 cellspacing=0 bgcolor=#E0E0E0 width=100%>\n\
             <tr align=center>\n\
             <td>\n\
             <td width=60%><b>Filename</b><td><b>Type</b><td><b>Size</b><td><b>Modified&nbsp;at</b>\n",
        ),
    }
}

/// Closes the table opened by [`table_header`].
pub fn table_footer(out: &mut Vec<u8>, entries: usize, style: ListingStyle) {
    if entries > 0 && !style.is_plain() {
        push(out, "</table>\n");
    }
}

/// Closes the document.
pub fn page_footer(out: &mut Vec<u8>, style: ListingStyle) {
    if style.is_plain() {
        push(out, "</pre>\n");
    }
    push(out, "</BODY></HTML>\n");
}

/// Size scaled to bytes, KB or MB, rounded to nearest.
pub fn scaled_size(size: u64) -> (u64, &'static str) {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if size <= 9999 {
        (size, "bytes")
    } else if size / KIB <= 9999 {
        (size / KIB + u64::from(size % KIB >= KIB / 2), "KB")
    } else {
        (size / MIB + u64::from(size % MIB >= MIB / 2), "MB")
    }
}

/// Type column text for `entry`.
pub fn type_label<'a>(entry: &Entry, content_type: Option<&'a str>) -> &'a str {
    if entry.is_dir() {
        "Directory"
    } else if entry.is_executable() {
        "Executable"
    } else {
        match content_type {
            Some(mime) if mime != OCTET_STREAM => mime,
            _ => "unknown",
        }
    }
}

/// Shortens names longer than [`MAX_NAME_LEN`] characters.
pub fn truncate_name(name: &str) -> Cow<'_, str> {
    if name.chars().count() <= MAX_NAME_LEN {
        return Cow::Borrowed(name);
    }
    let keep: String = name.chars().take(MAX_NAME_LEN - 3).collect();
    Cow::Owned(keep + "...")
}

/// Month, day and either the time of day or the year.
fn modification_parts(modified: SystemTime, now: SystemTime) -> (&'static str, String, String) {
    let stamp = OffsetDateTime::from(modified);
    let month = MONTHS[usize::from(u8::from(stamp.month())) - 1];
    let day = format!("{:>2}", stamp.day());
    let old = now
        .duration_since(modified)
        .is_ok_and(|age| age > RECENT_WINDOW);
    let tail = if old {
        format!("{:>5}", stamp.year())
    } else {
        format!("{:02}:{:02}", stamp.hour(), stamp.minute())
    };
    (month, day, tail)
}

/// One listing row; `index` counts from zero.
pub fn entry_row(
    out: &mut Vec<u8>,
    entry: &Entry,
    index: usize,
    content_type: Option<&str>,
    style: ListingStyle,
    now: SystemTime,
) {
    let (size, units) = scaled_size(entry.size());
    let label = type_label(entry, content_type);
    let handler = if label == "application/zip" || label == "application/epub" {
        "zip:"
    } else {
        ""
    };
    let marker = if entry.is_dir() { ">" } else { " " };
    let target = link_target(entry.reference().as_os_str().as_bytes());
    let display = entry.display_name();
    let short = truncate_name(&display);
    let name = html_escape(short.strip_prefix('/').unwrap_or(&short)).into_owned();
    let (month, day, tail) = modification_parts(entry.modified(), now);

    let row = match style {
        ListingStyle::Plain => {
            let dots = MAX_NAME_LEN.saturating_sub(short.chars().count());
            let leader = &LEADER_DOTS[LEADER_DOTS.len() - dots..];
            format!(
                "{marker}<a href='{handler}{target}'>{name}</a> {leader} {label:<11}{size:>4} {units:<5} {month} {day} {tail}\n"
            )
        }
        ListingStyle::Table => {
            let shade = if index % 2 == 0 { "bgcolor=#dcdcdc" } else { "" };
            format!(
                "<tr align=center {shade}><td>{marker}<td align=left><a href='{handler}{target}'>{name}</a><td>{label}<td>{size}&nbsp;{units}<td>{month}&nbsp;{day}&nbsp;{}\n",
                tail.trim_start()
            )
        }
    };
    push(out, &row);
}

/// A complete HTTP response describing `status`.
pub fn error_response(status: &ErrorStatus) -> Vec<u8> {
    let heading = html_escape(&status.to_string()).into_owned();
    let body = format!(
        "{DOCTYPE}<HTML><HEAD><TITLE>{heading}</TITLE></HEAD>\n<BODY><H1>{heading}</H1>\n<P>{}</P>\n</BODY></HTML>\n",
        html_escape(status.detail())
    );
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body.as_bytes());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn text(out: &[u8]) -> &str {
        std::str::from_utf8(out).unwrap()
    }

    fn page(directory: &[u8], style: ListingStyle) -> PageContext<'_> {
        PageContext {
            scheme: "file",
            directory,
            parent_scheme: "file",
            toggle_url: "dpi:/file/toggle",
            style,
        }
    }

    mod escaping {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn escaped_text_has_no_markup(text in any::<String>()) {
                let escaped = html_escape(&text);
                prop_assert!(!escaped.contains(['<', '>', '"', '\'']));
            }

            #[test]
            fn truncated_names_fit(name in "\\PC{0,60}") {
                prop_assert!(truncate_name(&name).chars().count() <= MAX_NAME_LEN);
            }
        }

        #[test]
        fn html_special_characters() {
            assert_eq!(html_escape("a<b>&'\""), "a&lt;b&gt;&amp;&#39;&quot;");
            assert!(matches!(html_escape("plain"), Cow::Borrowed(_)));
        }

        #[test]
        fn links_escape_spaces_and_quotes() {
            assert_eq!(uri_escape(b"/tmp/a b'c"), "/tmp/a%20b%27c");
            assert_eq!(uri_escape(b"/x/\xff"), "/x/%FF");
        }
    }

    mod page_parts {
        use super::*;

        #[test]
        fn header_carries_base_and_title() {
            let mut out = Vec::new();
            page_header(&mut out, &page(b"/tmp/my dir/", ListingStyle::Table));
            let html = text(&out);
            assert!(html.starts_with("<!DOCTYPE HTML PUBLIC"));
            assert!(html.contains("<BASE href='file:/tmp/my%20dir/'>"));
            assert!(html.contains("<TITLE>file:/tmp/my dir/</TITLE>"));
            assert!(html.contains("<H1>Directory listing of /tmp/my dir/</H1>"));
            assert!(!html.contains("<pre>"));
        }

        #[test]
        fn plain_style_opens_pre() {
            let mut out = Vec::new();
            page_header(&mut out, &page(b"/", ListingStyle::Plain));
            assert!(text(&out).ends_with("<pre>\n"));
        }

        #[test]
        fn parent_link_is_suppressed_at_root() {
            let mut out = Vec::new();
            parent_link(&mut out, &page(b"/", ListingStyle::Table));
            assert!(out.is_empty());
            parent_link(&mut out, &page(b"/usr/share/", ListingStyle::Table));
            assert_eq!(text(&out), "<a href='file:/usr/'>Parent directory</a>");
        }

        #[test]
        fn empty_directory_note() {
            let mut out = Vec::new();
            table_header(&mut out, 0, ListingStyle::Table);
            table_footer(&mut out, 0, ListingStyle::Table);
            assert_eq!(text(&out), "<br><br>Directory is empty.");
        }

        #[test]
        fn footers_close_what_headers_opened() {
            let mut out = Vec::new();
            table_footer(&mut out, 3, ListingStyle::Table);
            page_footer(&mut out, ListingStyle::Table);
            assert_eq!(text(&out), "</table>\n</BODY></HTML>\n");

            let mut out = Vec::new();
            table_footer(&mut out, 3, ListingStyle::Plain);
            page_footer(&mut out, ListingStyle::Plain);
            assert_eq!(text(&out), "</pre>\n</BODY></HTML>\n");
        }
    }

    mod rows {
        use super::*;

        const DAY: u64 = 86_400;

        fn at(secs: u64) -> SystemTime {
            UNIX_EPOCH + Duration::from_secs(secs)
        }

        #[test]
        fn sizes_scale_and_round() {
            assert_eq!(scaled_size(9999), (9999, "bytes"));
            assert_eq!(scaled_size(10_000), (10, "KB"));
            assert_eq!(scaled_size(10_752), (11, "KB"));
            assert_eq!(scaled_size(20 * 1024 * 1024), (20, "MB"));
        }

        #[test]
        fn long_names_are_truncated_on_char_boundaries() {
            let long = "é".repeat(40);
            let short = truncate_name(&long);
            assert_eq!(short.chars().count(), 30);
            assert!(short.ends_with("..."));
            assert_eq!(truncate_name("short.txt"), "short.txt");
        }

        #[test]
        fn table_row_for_recent_file() {
            // 2023-01-15 10:31 UTC
            let modified = at(1_673_778_660);
            let entry = Entry::new("notes.txt", "/tmp/notes.txt", 12, 0o100_644, modified);
            let mut out = Vec::new();
            entry_row(&mut out, &entry, 0, Some("text/plain"), ListingStyle::Table, modified);
            assert_eq!(
                text(&out),
                "<tr align=center bgcolor=#dcdcdc><td> <td align=left><a href='/tmp/notes.txt'>notes.txt</a><td>text/plain<td>12&nbsp;bytes<td>Jan&nbsp;15&nbsp;10:31\n"
            );
        }

        #[test]
        fn old_entries_show_the_year() {
            let modified = at(1_673_778_660);
            let now = at(1_673_778_660 + 200 * DAY);
            let entry = Entry::new("old", "/tmp/old", 1, 0o100_644, modified);
            let mut out = Vec::new();
            entry_row(&mut out, &entry, 1, None, ListingStyle::Table, now);
            let html = text(&out);
            assert!(html.starts_with("<tr align=center >"));
            assert!(html.contains("<td>unknown<td>"));
            assert!(html.ends_with("Jan&nbsp;15&nbsp;2023\n"));
        }

        #[test]
        fn plain_row_pads_with_leader_dots() {
            let modified = at(1_673_778_660);
            let entry = Entry::new("docs", "/tmp/docs", 4096, 0o040_755, modified);
            let mut out = Vec::new();
            entry_row(&mut out, &entry, 0, None, ListingStyle::Plain, modified);
            let expected_leader = &LEADER_DOTS[LEADER_DOTS.len() - 26..];
            assert_eq!(
                text(&out),
                format!(
                    "><a href='/tmp/docs'>docs</a> {expected_leader} Directory  4096 bytes Jan 15 10:31\n"
                )
            );
        }

        #[test]
        fn archives_link_through_zip_scheme() {
            let entry = Entry::new("a.zip", "/tmp/a.zip", 10, 0o100_644, at(0));
            let mut out = Vec::new();
            entry_row(&mut out, &entry, 0, Some("application/zip"), ListingStyle::Table, at(0));
            assert!(text(&out).contains("<a href='zip:/tmp/a.zip'>a.zip</a>"));
        }

        #[test]
        fn executables_are_labelled() {
            let entry = Entry::new("run", "/bin/run", 10, 0o100_755, at(0));
            assert_eq!(type_label(&entry, Some("text/plain")), "Executable");
        }
    }

    #[test]
    fn error_response_is_complete() {
        let response = error_response(&ErrorStatus::not_found("No such file or directory"));
        let text = String::from_utf8(response).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Content-Type: text/html"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert!(body.contains("<H1>404 Not Found</H1>"));
        assert!(body.contains("No such file or directory"));
    }
}
