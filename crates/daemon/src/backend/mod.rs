//! Content producers and the services that choose them.
//!
//! A [`Service`] turns one request into a [`Producer`]. The connection state
//! machine then pulls the response out of the producer one piece at a time:
//! the optional HTTP head, a preamble, body chunks until
//! [`Progress::Finished`], and an epilogue. Producers never write to the
//! transport themselves, so backpressure is handled in one place.

use std::borrow::Cow;
use std::io;
use std::os::fd::BorrowedFd;

use protocol::{Record, ResourceError, ResourceId};

use crate::status::ErrorStatus;
use crate::style::ListingStyle;

pub mod archive;
pub mod directory;
pub mod file;
pub mod man;
pub mod stream;

/// Largest body chunk read from a resource in one step.
pub const CHUNK_LEN: usize = 16 * 1024;

/// Result of one [`Producer::produce`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Bytes were appended; call again.
    Produced,
    /// The source has nothing yet; wait for [`Producer::source_fd`].
    WouldBlock,
    /// The body is complete.
    Finished,
}

/// Status line and headers of a successful response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseHead {
    content_type: Option<Cow<'static, str>>,
    content_length: Option<u64>,
    gzip: bool,
}

impl ResponseHead {
    /// A `200 OK` head with the given content type.
    pub fn new(content_type: impl Into<Cow<'static, str>>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    /// A `200 OK` head for an HTML page.
    pub fn html() -> Self {
        Self::new("text/html")
    }

    /// A head that leaves the content type to the receiver.
    pub fn untyped() -> Self {
        Self::default()
    }

    /// Adds a `Content-Length` header.
    #[must_use]
    pub fn with_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    /// Adds `Content-Encoding: gzip`.
    #[must_use]
    pub fn gzipped(mut self) -> Self {
        self.gzip = true;
        self
    }

    /// The declared content type.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Appends the status line, headers and blank line.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
        if self.gzip {
            out.extend_from_slice(b"Content-Encoding: gzip\r\n");
        }
        if let Some(content_type) = &self.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        if let Some(length) = self.content_length {
            out.extend_from_slice(format!("Content-Length: {length}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }
}

/// A resumable source of one response.
pub trait Producer {
    /// Head to send after the begin-response record. `None` means the body
    /// already carries its own HTTP head.
    fn head(&self) -> Option<ResponseHead>;

    /// Appends what precedes the body, such as a page header.
    fn preamble(&mut self, _out: &mut Vec<u8>) {}

    /// Appends the next piece of the body.
    fn produce(&mut self, out: &mut Vec<u8>) -> io::Result<Progress>;

    /// Appends what follows the body.
    fn epilogue(&mut self, _out: &mut Vec<u8>) {}

    /// Descriptor to wait on after [`Progress::WouldBlock`].
    fn source_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// One request as seen by a service.
#[derive(Clone, Copy, Debug)]
pub struct Request<'a> {
    /// The request url, verbatim.
    pub url: &'a str,
    /// The whole request record, for services that need extra attributes.
    pub record: &'a Record,
    /// Listing style in effect when the request was dispatched.
    pub style: ListingStyle,
}

/// Why a request could not be opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenError {
    /// The request is malformed; the connection is closed without a page.
    Rejected(String),
    /// The request is valid but fails; an error page is sent.
    Status(ErrorStatus),
}

impl From<ErrorStatus> for OpenError {
    fn from(status: ErrorStatus) -> Self {
        Self::Status(status)
    }
}

impl From<ResourceError> for OpenError {
    fn from(error: ResourceError) -> Self {
        Self::Rejected(error.to_string())
    }
}

/// Rejects a resource that does not name an absolute local path.
pub(crate) fn require_absolute(resource: &ResourceId) -> Result<(), OpenError> {
    if resource.is_absolute() {
        Ok(())
    } else {
        Err(OpenError::Rejected(format!(
            "url '{}' does not name an absolute path",
            resource.url()
        )))
    }
}

/// A kind of resource a daemon serves.
pub trait Service {
    /// Scheme of the urls this service accepts.
    fn scheme(&self) -> &'static str;

    /// Pseudo-url that flips the listing style, if the service renders
    /// listings.
    fn toggle_url(&self) -> Option<&'static str> {
        None
    }

    /// Resolves `request` into a producer.
    fn open(&self, request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError>;
}
