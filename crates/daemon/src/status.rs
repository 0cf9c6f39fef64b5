//! HTTP error statuses reported to the peer.

use std::borrow::Cow;
use std::fmt;
use std::io;

use listing::ListingError;
use pipeline::ResolveError;

/// A failed request, answered with a complete error page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorStatus {
    code: u16,
    reason: Cow<'static, str>,
    detail: String,
}

impl ErrorStatus {
    /// Creates a status with an explicit reason phrase.
    pub fn new(code: u16, reason: impl Into<Cow<'static, str>>, detail: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            detail: detail.into(),
        }
    }

    /// `403 Forbidden`.
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(403, "Forbidden", detail)
    }

    /// `404 Not Found`.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(404, "Not Found", detail)
    }

    /// `500 Internal Server Error`.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(500, "Internal Server Error", detail)
    }

    /// `500 Execution Error`, used by the script runner.
    pub fn execution(detail: impl Into<String>) -> Self {
        Self::new(500, "Execution Error", detail)
    }

    /// Maps an I/O failure: permission problems are 403, missing resources
    /// 404, anything else 500.
    pub fn from_io(error: &io::Error) -> Self {
        let detail = describe_io(error);
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::forbidden(detail),
            io::ErrorKind::NotFound => Self::not_found(detail),
            _ => Self::internal(detail),
        }
    }

    /// Numeric status code.
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Human-readable cause shown in the page body.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

impl From<ResolveError> for ErrorStatus {
    fn from(error: ResolveError) -> Self {
        Self::not_found(error.to_string())
    }
}

impl From<ListingError> for ErrorStatus {
    fn from(error: ListingError) -> Self {
        match &error {
            ListingError::Unreadable { source, .. } => Self::from_io(source),
            ListingError::Helper { .. } => Self::internal(error.to_string()),
        }
    }
}

/// The operating system's description of `error`, without the
/// `(os error N)` suffix the standard library appends.
pub fn describe_io(error: &io::Error) -> String {
    let text = error.to_string();
    match text.rfind(" (os error ") {
        Some(cut) if error.raw_os_error().is_some() => text[..cut].to_owned(),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_http_codes() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let missing = io::Error::from(io::ErrorKind::NotFound);
        let other = io::Error::from(io::ErrorKind::InvalidData);
        assert_eq!(ErrorStatus::from_io(&denied).code(), 403);
        assert_eq!(ErrorStatus::from_io(&missing).code(), 404);
        assert_eq!(ErrorStatus::from_io(&other).code(), 500);
    }

    #[test]
    fn os_errors_lose_their_number() {
        let error = io::Error::from_raw_os_error(libc_enoent());
        let status = ErrorStatus::from_io(&error);
        assert_eq!(status.to_string(), "404 Not Found");
        assert!(!status.detail().contains("os error"));
        assert!(!status.detail().is_empty());
    }

    #[test]
    fn resolve_errors_are_not_found() {
        let status = ErrorStatus::from(ResolveError::UnsafeCharacter('$'));
        assert_eq!(status.code(), 404);
    }

    #[test]
    fn listing_errors_keep_their_io_cause() {
        let unreadable = |kind| ListingError::Unreadable {
            path: "/srv/dir".into(),
            source: io::Error::from(kind),
        };
        assert_eq!(ErrorStatus::from(unreadable(io::ErrorKind::PermissionDenied)).code(), 403);
        assert_eq!(ErrorStatus::from(unreadable(io::ErrorKind::NotFound)).code(), 404);
        assert_eq!(ErrorStatus::from(unreadable(io::ErrorKind::Other)).code(), 500);
    }

    #[test]
    fn custom_reason_is_kept() {
        let status = ErrorStatus::execution("script missing");
        assert_eq!(status.to_string(), "500 Execution Error");
        assert_eq!(status.detail(), "script missing");
    }

    const fn libc_enoent() -> i32 {
        2
    }
}
