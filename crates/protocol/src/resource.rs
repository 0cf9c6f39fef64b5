//! Resource identifiers of the form `<scheme>:<path>[?<query>]`.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use percent_encoding::percent_decode_str;

/// Reasons a request url cannot be turned into a [`ResourceId`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// The url does not start with the daemon's scheme.
    #[error("url '{url}' does not use the {expected}: scheme")]
    SchemeMismatch {
        /// Scheme the daemon serves.
        expected: String,
        /// Offending url.
        url: String,
    },
    /// The path is empty and the daemon has no default resource.
    #[error("url '{0}' names no resource")]
    EmptyPath(String),
}

/// A parsed request url.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceId {
    url: String,
    path: Vec<u8>,
    query: Option<String>,
}

impl ResourceId {
    /// Parses `url` for a daemon serving `scheme`; an empty path is an error.
    pub fn parse(scheme: &str, url: &str) -> Result<Self, ResourceError> {
        Self::parse_or_default(scheme, url, None)
    }

    /// Parses `url`, substituting `default` when the path is empty.
    ///
    /// The scheme matches case-insensitively. A `//localhost` authority is
    /// dropped, leading slashes collapse to one and percent escapes are
    /// decoded. The query (after the first `?`) is kept verbatim.
    pub fn parse_or_default(
        scheme: &str,
        url: &str,
        default: Option<&str>,
    ) -> Result<Self, ResourceError> {
        let rest = strip_scheme(scheme, url).ok_or_else(|| ResourceError::SchemeMismatch {
            expected: scheme.to_owned(),
            url: url.to_owned(),
        })?;
        let (raw_path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (rest, None),
        };

        let raw_path = match raw_path.get(..LOCALHOST.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(LOCALHOST) => {
                &raw_path[LOCALHOST.len() - 1..]
            }
            _ => raw_path,
        };
        let trimmed = raw_path.trim_start_matches('/');
        let mut path = Vec::with_capacity(raw_path.len());
        if trimmed.len() != raw_path.len() {
            path.push(b'/');
        }
        path.extend(percent_decode_str(trimmed));

        if path.is_empty() {
            match default {
                Some(name) => path.extend_from_slice(name.as_bytes()),
                None => return Err(ResourceError::EmptyPath(url.to_owned())),
            }
        }

        Ok(Self {
            url: url.to_owned(),
            path,
            query,
        })
    }

    /// The url exactly as received.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Decoded path bytes.
    pub fn path_bytes(&self) -> &[u8] {
        &self.path
    }

    /// Decoded path as a filesystem path.
    pub fn path(&self) -> &Path {
        Path::new(OsStr::from_bytes(&self.path))
    }

    /// Raw query text, if the url had one.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns `true` when the path starts with `/`.
    pub fn is_absolute(&self) -> bool {
        self.path.first() == Some(&b'/')
    }

    /// The path with a trailing `#fragment` removed, if it has one.
    pub fn without_fragment(&self) -> Option<&Path> {
        let hash = self.path.iter().rposition(|&byte| byte == b'#')?;
        Some(Path::new(OsStr::from_bytes(&self.path[..hash])))
    }
}

const LOCALHOST: &str = "//localhost/";

fn strip_scheme<'a>(scheme: &str, url: &'a str) -> Option<&'a str> {
    let prefix = url.get(..scheme.len())?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return None;
    }
    url[scheme.len()..].strip_prefix(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    mod scheme {
        use super::*;

        #[test]
        fn matches_case_insensitively() {
            let id = ResourceId::parse("file", "FILE:/etc").unwrap();
            assert_eq!(id.path(), Path::new("/etc"));
            assert_eq!(id.url(), "FILE:/etc");
        }

        #[test]
        fn rejects_other_schemes() {
            assert!(matches!(
                ResourceId::parse("file", "zip:/a.zip"),
                Err(ResourceError::SchemeMismatch { .. })
            ));
            assert!(ResourceId::parse("file", "fil").is_err());
            assert!(ResourceId::parse("file", "files:/x").is_err());
        }
    }

    mod path_normalisation {
        use super::*;

        #[test]
        fn collapses_leading_slashes() {
            let id = ResourceId::parse("file", "file:///usr//share").unwrap();
            assert_eq!(id.path_bytes(), b"/usr//share");
        }

        #[test]
        fn drops_localhost_authority() {
            let id = ResourceId::parse("file", "file://localhost/tmp/x").unwrap();
            assert_eq!(id.path(), Path::new("/tmp/x"));
        }

        #[test]
        fn decodes_percent_escapes() {
            let id = ResourceId::parse("file", "file:/tmp/a%20b%2Fc").unwrap();
            assert_eq!(id.path_bytes(), b"/tmp/a b/c");
        }

        #[test]
        fn keeps_non_utf8_octets() {
            let id = ResourceId::parse("file", "file:/tmp/%FF").unwrap();
            assert_eq!(id.path_bytes(), b"/tmp/\xff");
        }

        #[test]
        fn relative_path_is_kept_relative() {
            let id = ResourceId::parse("man", "man:ls(1)").unwrap();
            assert!(!id.is_absolute());
            assert_eq!(id.path_bytes(), b"ls(1)");
        }
    }

    mod query_and_defaults {
        use super::*;

        #[test]
        fn splits_query_before_decoding() {
            let id = ResourceId::parse("dls", "dls:search?q=a%20b").unwrap();
            assert_eq!(id.path_bytes(), b"search");
            assert_eq!(id.query(), Some("q=a%20b"));
        }

        #[test]
        fn encoded_question_mark_stays_in_path() {
            let id = ResourceId::parse("file", "file:/tmp/why%3F").unwrap();
            assert_eq!(id.path_bytes(), b"/tmp/why?");
            assert_eq!(id.query(), None);
        }

        #[test]
        fn empty_path_uses_default() {
            let id = ResourceId::parse_or_default("dls", "dls:?x", Some("default")).unwrap();
            assert_eq!(id.path_bytes(), b"default");
            assert_eq!(id.query(), Some("x"));
        }

        #[test]
        fn empty_path_without_default_fails() {
            assert_eq!(
                ResourceId::parse("file", "file:"),
                Err(ResourceError::EmptyPath("file:".to_owned()))
            );
        }
    }

    #[test]
    fn fragment_is_split_from_the_end() {
        let id = ResourceId::parse("file", "file:/doc/a#b.html#top").unwrap();
        assert_eq!(id.without_fragment(), Some(Path::new("/doc/a#b.html")));
        let plain = ResourceId::parse("file", "file:/doc/a.html").unwrap();
        assert_eq!(plain.without_fragment(), None);
    }
}
