//! Content-type inference.
//!
//! [`classify`] consults [`by_extension`] first and only asks for a data
//! sample when the name is not recognised. [`by_data`] applies signature
//! checks in a fixed order and falls back to counting high-bit bytes.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Bytes inspected when sniffing.
pub const SNIFF_LEN: usize = 256;

/// High-bit bytes tolerated in a full sample before it counts as binary.
pub const HIGH_BIT_THRESHOLD: usize = 10;

/// Generic binary type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Plain text type.
pub const TEXT_PLAIN: &str = "text/plain";

/// HTML type.
pub const TEXT_HTML: &str = "text/html";

const EXTENSIONS: &[(&str, &str)] = &[
    ("gif", "image/gif"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("html", TEXT_HTML),
    ("htm", TEXT_HTML),
    ("shtml", TEXT_HTML),
    ("xhtml", TEXT_HTML),
    ("xml", "text/xml"),
    ("ncx", "text/xml"),
    ("opf", "text/xml"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("epub", "application/epub"),
    ("rss", "application/rss+xml"),
    ("gmi", "text/gemini"),
    ("gophermap", "text/gopher"),
    ("md", "text/markdown"),
    ("js", "text/javascript"),
    ("css", "text/css"),
    ("txt", TEXT_PLAIN),
];

const HTML_PREFIXES: &[&[u8]] = &[
    b"<html",
    b"<head",
    b"<title",
    b"<!doctype html",
    b"<!-- HTML listing",
];

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"GIF8", "image/gif"),
    (b"\x89PNG", "image/png"),
    (b"\xff\xd8", "image/jpeg"),
    (b"PK\x03\x04", "application/zip"),
    (b"PK\x05\x06", "application/zip"),
    (b"PK\x07\x08", "application/zip"),
];

/// Type implied by the extension of the final component of `name`.
pub fn by_extension(name: &Path) -> Option<&'static str> {
    let file_name = name.file_name()?.as_bytes();
    let dot = file_name.iter().rposition(|&byte| byte == b'.')?;
    let extension = &file_name[dot + 1..];
    EXTENSIONS
        .iter()
        .find(|(known, _)| known.as_bytes().eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
}

/// Type implied by the leading bytes of a resource.
///
/// `sample` should hold at most [`SNIFF_LEN`] bytes and must be either a full
/// sample or the complete resource.
pub fn by_data(sample: &[u8]) -> &'static str {
    let sample = &sample[..sample.len().min(SNIFF_LEN)];
    let start = sample
        .iter()
        .position(|&byte| !is_space(byte))
        .unwrap_or(sample.len());
    let trimmed = &sample[start..];
    if HTML_PREFIXES
        .iter()
        .any(|prefix| starts_with_ignore_case(trimmed, prefix))
    {
        return TEXT_HTML;
    }
    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| sample.starts_with(magic)) {
        return mime;
    }

    let high_bit = sample.iter().filter(|&&byte| byte >= 0x80).count();
    // A short sample is the whole resource, so no stray byte is tolerated.
    let limit = if sample.len() == SNIFF_LEN {
        HIGH_BIT_THRESHOLD
    } else {
        0
    };
    if high_bit > limit { OCTET_STREAM } else { TEXT_PLAIN }
}

/// ASCII whitespace including vertical tab.
const fn is_space(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == 0x0b
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Classifies `name`, calling `sample` for leading bytes only when the
/// extension is unknown. A missing or empty sample leaves the type unknown.
pub fn classify<F>(name: &Path, sample: F) -> Option<&'static str>
where
    F: FnOnce() -> Option<Vec<u8>>,
{
    by_extension(name).or_else(|| {
        sample()
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| by_data(&bytes))
    })
}

/// Reads up to [`SNIFF_LEN`] bytes from `reader`, stopping early at end of
/// input.
pub fn read_sample<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    let mut sample = Vec::with_capacity(SNIFF_LEN);
    reader.take(SNIFF_LEN as u64).read_to_end(&mut sample)?;
    Ok(sample)
}

/// Classifies a file on disk, sniffing its first bytes when needed.
pub fn classify_file(path: &Path) -> Option<&'static str> {
    classify(path, || File::open(path).and_then(read_sample).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;

    mod extensions {
        use super::*;

        #[test]
        fn known_extensions_are_case_insensitive() {
            assert_eq!(by_extension(Path::new("/a/Report.PDF")), Some("application/pdf"));
            assert_eq!(by_extension(Path::new("x.JpEg")), Some("image/jpeg"));
            assert_eq!(by_extension(Path::new("book.epub")), Some("application/epub"));
            assert_eq!(by_extension(Path::new("index.gophermap")), Some("text/gopher"));
        }

        #[test]
        fn only_last_dot_of_file_name_counts() {
            assert_eq!(by_extension(Path::new("archive.tar.gz")), None);
            assert_eq!(by_extension(Path::new("/dir.html/readme")), None);
            assert_eq!(by_extension(Path::new("noext")), None);
        }

        #[test]
        fn extension_short_circuits_sniffing() {
            let mime = classify(Path::new("report.pdf"), || panic!("sniffed"));
            assert_eq!(mime, Some("application/pdf"));
        }
    }

    mod sniffing {
        use super::*;

        #[test]
        fn html_after_whitespace() {
            assert_eq!(by_data(b"  \n<!DOCTYPE HTML PUBLIC"), TEXT_HTML);
            assert_eq!(by_data(b"<HTML><body>"), TEXT_HTML);
            assert_eq!(by_data(b"<!-- HTML listing -->"), TEXT_HTML);
        }

        #[test]
        fn vertical_tab_counts_as_leading_space() {
            assert_eq!(by_data(b"\x0b\x0c <html>"), TEXT_HTML);
        }

        #[test]
        fn magic_bytes() {
            assert_eq!(by_data(b"GIF89a...."), "image/gif");
            assert_eq!(by_data(b"\x89PNG\r\n\x1a\n"), "image/png");
            assert_eq!(by_data(b"\xff\xd8\xff\xe0"), "image/jpeg");
            assert_eq!(by_data(b"PK\x03\x04rest"), "application/zip");
            assert_eq!(by_data(b"PK\x05\x06"), "application/zip");
        }

        #[test]
        fn full_sample_tolerates_ten_high_bytes() {
            let mut sample = vec![b'a'; SNIFF_LEN];
            sample[..10].fill(0xe9);
            assert_eq!(by_data(&sample), TEXT_PLAIN);
            sample[10] = 0xe9;
            assert_eq!(by_data(&sample), OCTET_STREAM);
        }

        #[test]
        fn short_sample_tolerates_no_high_bytes() {
            assert_eq!(by_data(b"plain words"), TEXT_PLAIN);
            assert_eq!(by_data(b"caf\xc3\xa9"), OCTET_STREAM);
            assert_eq!(by_data(b""), TEXT_PLAIN);
        }

        #[test]
        fn unknown_without_sample() {
            assert_eq!(classify(Path::new("data.bin"), || None), None);
            assert_eq!(classify(Path::new("data.bin"), || Some(Vec::new())), None);
        }
    }

    mod files {
        use super::*;

        #[test]
        fn sniffs_file_without_extension() {
            let temp = tempfile::tempdir().unwrap();
            let path = temp.path().join("page");
            fs::write(&path, b"<html><p>hi</p></html>").unwrap();
            assert_eq!(classify_file(&path), Some(TEXT_HTML));
        }

        #[test]
        fn sample_stops_at_limit() {
            let data = vec![b'x'; 1000];
            assert_eq!(read_sample(&data[..]).unwrap().len(), SNIFF_LEN);
            assert_eq!(read_sample(&b"abc"[..]).unwrap(), b"abc");
        }

        #[test]
        fn empty_file_is_unknown() {
            let temp = tempfile::tempdir().unwrap();
            let path = temp.path().join("empty");
            fs::write(&path, b"").unwrap();
            assert_eq!(classify_file(&path), None);
        }

        #[test]
        fn missing_file_is_unknown() {
            let temp = tempfile::tempdir().unwrap();
            assert_eq!(classify_file(&temp.path().join("absent")), None);
        }
    }

    proptest! {
        #[test]
        fn classification_is_deterministic(name in "[a-z]{1,8}(\\.[a-zA-Z]{1,5})?", data in prop::collection::vec(any::<u8>(), 0..300)) {
            let path = Path::new(&name);
            let first = classify(path, || Some(data.clone()));
            let second = classify(path, || Some(data.clone()));
            prop_assert_eq!(first, second);
        }
    }
}
