//! Formatted manual pages.
//!
//! Pages are rendered by `man` and flattened by `col -b`; the resulting text
//! is relayed line by line inside `<pre>`, with headings emphasised and the
//! references under `SEE ALSO` turned into `man:` links.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::mem;
use std::os::fd::BorrowedFd;
use std::path::Path;

use logging::targets;
use memchr::memchr_iter;
use pipeline::{PipelineBuilder, ResolveError, ShellSafePath, Stage, resolve_existing_file};
use protocol::ResourceId;
use tracing::debug;

use super::stream::{Source, read_chunk};
use super::{CHUNK_LEN, OpenError, Producer, Progress, Request, ResponseHead, Service};
use crate::render::html_escape;
use crate::status::ErrorStatus;

/// Scheme served by [`ManService`].
pub const MAN_SCHEME: &str = "man";

const SEE_ALSO: &[u8] = b"SEE ALSO";

/// What a `man:` url asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManPage {
    /// A page source file on disk.
    File(ShellSafePath),
    /// A page looked up by name, optionally in one section.
    Named {
        /// Page name.
        name: String,
        /// Section, from a `name(section)` url.
        section: Option<String>,
    },
}

impl ManPage {
    /// Interprets the decoded url path.
    ///
    /// Absolute paths name a file, resolved to its longest existing prefix.
    /// Anything else is a page name.
    pub fn from_path(path: &Path) -> Result<Self, ResolveError> {
        let safe = ShellSafePath::new(path)?;
        if safe.as_str().starts_with('/') {
            match resolve_existing_file(path) {
                Ok(resolved) => return Ok(Self::File(ShellSafePath::new(&resolved.file)?)),
                Err(ResolveError::NotFound(_)) => {}
                Err(error) => return Err(error),
            }
        }
        let text = safe.as_str().trim_start_matches('/');
        if text.is_empty() || text.contains('/') {
            return Err(ResolveError::NotFound(path.to_path_buf()));
        }
        Ok(match text.strip_suffix(')').and_then(|t| t.split_once('(')) {
            Some((name, section)) if !name.is_empty() && !section.is_empty() => Self::Named {
                name: name.to_owned(),
                section: Some(section.to_owned()),
            },
            _ => Self::Named {
                name: text.to_owned(),
                section: None,
            },
        })
    }

    /// Arguments passed to `man`.
    pub fn man_args(&self) -> Vec<OsString> {
        match self {
            Self::File(path) => vec!["--".into(), path.as_path().as_os_str().to_owned()],
            Self::Named { name, section } => {
                let mut args: Vec<OsString> = Vec::with_capacity(3);
                if let Some(section) = section {
                    args.push(section.into());
                }
                args.push("--".into());
                args.push(name.into());
                args
            }
        }
    }
}

impl fmt::Display for ManPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{path}"),
            Self::Named { name, section: Some(section) } => write!(f, "{name}({section})"),
            Self::Named { name, section: None } => f.write_str(name),
        }
    }
}

/// Serves `man:` urls.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManService;

impl Service for ManService {
    fn scheme(&self) -> &'static str {
        MAN_SCHEME
    }

    fn open(&self, request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError> {
        let resource = ResourceId::parse(MAN_SCHEME, request.url)?;
        let page = ManPage::from_path(resource.path()).map_err(ErrorStatus::from)?;
        let pipeline = PipelineBuilder::new()
            .stage(Stage::exec("man", page.man_args()))
            .stage(Stage::exec("col", ["-b"]))
            .spawn()
            .map_err(|error| ErrorStatus::internal(error.to_string()))?;
        pipeline
            .set_nonblocking(true)
            .map_err(|error| ErrorStatus::internal(error.to_string()))?;
        debug!(target: targets::HELPER, %page, pipeline = pipeline.description(), "formatting manual page");
        Ok(Box::new(ManProducer::new(pipeline)))
    }
}

/// Turns formatter output into an HTML body.
#[derive(Debug)]
pub struct ManProducer<S> {
    source: S,
    pending: Vec<u8>,
    see_also: bool,
    finished: bool,
}

impl<S: Source> ManProducer<S> {
    /// Reads formatted text from `source`.
    pub fn new(source: S) -> Self {
        Self {
            source,
            pending: Vec::new(),
            see_also: false,
            finished: false,
        }
    }
}

impl<S: Source> Producer for ManProducer<S> {
    fn head(&self) -> Option<ResponseHead> {
        Some(ResponseHead::html())
    }

    fn preamble(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"<pre>");
    }

    fn produce(&mut self, out: &mut Vec<u8>) -> io::Result<Progress> {
        if self.finished {
            return Ok(Progress::Finished);
        }
        let mut pending = mem::take(&mut self.pending);
        let progress = read_chunk(&mut self.source, &mut pending, CHUNK_LEN);
        let progress = match progress {
            Ok(progress) => progress,
            Err(error) => {
                self.pending = pending;
                return Err(error);
            }
        };
        match progress {
            Progress::WouldBlock => {
                self.pending = pending;
                Ok(Progress::WouldBlock)
            }
            Progress::Finished => {
                self.finished = true;
                if !pending.is_empty() {
                    render_line(&pending, &mut self.see_also, out);
                }
                Ok(Progress::Produced)
            }
            Progress::Produced => {
                let mut start = 0;
                for end in memchr_iter(b'\n', &pending) {
                    render_line(&pending[start..=end], &mut self.see_also, out);
                    start = end + 1;
                }
                pending.drain(..start);
                self.pending = pending;
                Ok(Progress::Produced)
            }
        }
    }

    fn epilogue(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"</pre>");
    }

    fn source_fd(&self) -> Option<BorrowedFd<'_>> {
        self.source.readiness_fd()
    }
}

/// Appends one formatted line, with its newline if it had one.
fn render_line(line: &[u8], see_also: &mut bool, out: &mut Vec<u8>) {
    let (text, newline) = match line.strip_suffix(b"\n") {
        Some(text) => (text, true),
        None => (line, false),
    };
    let heading = text.len() >= 2 && text[0].is_ascii_uppercase() && text[1].is_ascii_uppercase();
    if heading {
        out.extend_from_slice(b"<strong>");
    }
    if *see_also {
        link_references(text, out);
    } else {
        push_escaped(text, out);
    }
    if heading {
        out.extend_from_slice(b"</strong>");
    }
    if newline {
        out.push(b'\n');
    }
    *see_also = text.starts_with(SEE_ALSO);
}

/// Links each comma separated reference, keeping indentation and separators.
fn link_references(text: &[u8], out: &mut Vec<u8>) {
    let indent = text.iter().take_while(|&&byte| byte == b' ').count();
    out.extend_from_slice(&text[..indent]);
    let mut rest = &text[indent..];
    while !rest.is_empty() {
        let end = rest.iter().position(|&byte| byte == b',').unwrap_or(rest.len());
        let reference = &rest[..end];
        if !reference.is_empty() {
            let escaped = String::from_utf8_lossy(reference);
            let escaped = html_escape(&escaped);
            out.extend_from_slice(b"<a href=\"man:");
            out.extend_from_slice(escaped.as_bytes());
            out.extend_from_slice(b"\">");
            out.extend_from_slice(escaped.as_bytes());
            out.extend_from_slice(b"</a>");
        }
        rest = &rest[end..];
        let separators = rest
            .iter()
            .take_while(|&&byte| byte == b',' || byte == b' ')
            .count();
        out.extend_from_slice(&rest[..separators]);
        rest = &rest[separators..];
    }
}

fn push_escaped(text: &[u8], out: &mut Vec<u8>) {
    let text = String::from_utf8_lossy(text);
    out.extend_from_slice(html_escape(&text).as_bytes());
}
