//! Local files and directories.

use std::fs::{self, File};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use listing::classify::{self, OCTET_STREAM};
use listing::scan_directory;
use logging::targets;
use protocol::ResourceId;
use tracing::debug;

use super::directory::DirectoryProducer;
use super::stream::StreamProducer;
use super::{OpenError, Producer, Request, ResponseHead, Service, require_absolute};
use crate::status::ErrorStatus;
use crate::style::ListingStyle;

/// Scheme served by [`FileService`].
pub const FILE_SCHEME: &str = "file";

/// Pseudo-url that flips the listing style of file pages.
pub const FILE_TOGGLE_URL: &str = "dpi:/file/toggle";

/// Serves `file:` urls from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileService;

impl Service for FileService {
    fn scheme(&self) -> &'static str {
        FILE_SCHEME
    }

    fn toggle_url(&self) -> Option<&'static str> {
        Some(FILE_TOGGLE_URL)
    }

    fn open(&self, request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError> {
        let resource = ResourceId::parse(FILE_SCHEME, request.url)?;
        require_absolute(&resource)?;
        let path = local_path(&resource);
        debug!(target: targets::CONN, path = %path.display(), "opening local path");
        Ok(open_path(&path, request.style)?)
    }
}

/// The path a resource names, dropping a `#fragment` that is not part of an
/// existing file name.
fn local_path(resource: &ResourceId) -> PathBuf {
    let full = resource.path();
    if full.exists() {
        return full.to_path_buf();
    }
    resource
        .without_fragment()
        .unwrap_or(full)
        .to_path_buf()
}

/// Opens `path` as a listing page or a file body.
pub fn open_path(path: &Path, style: ListingStyle) -> Result<Box<dyn Producer>, ErrorStatus> {
    let metadata = fs::metadata(path).map_err(|error| ErrorStatus::from_io(&error))?;
    if metadata.is_dir() {
        let listing = scan_directory(path)?;
        let page = DirectoryProducer::new(FILE_SCHEME, FILE_TOGGLE_URL, path, listing, style);
        return Ok(Box::new(page));
    }
    if !metadata.is_file() {
        return Err(ErrorStatus::not_found(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    let file = File::open(path).map_err(|error| ErrorStatus::from_io(&error))?;
    let head = file_head(path).with_length(metadata.len());
    Ok(Box::new(StreamProducer::new(head, file)))
}

/// Headers for a file body.
pub fn file_head(path: &Path) -> ResponseHead {
    gzip_head(path).unwrap_or_else(|| {
        ResponseHead::new(classify::classify_file(path).unwrap_or(OCTET_STREAM))
    })
}

/// Headers for a body named `name` when it ends in `.gz`.
///
/// The suffix is stripped before classification by extension; the content
/// type is then only sent when it is definite.
pub fn gzip_head(name: &Path) -> Option<ResponseHead> {
    let inner = strip_gz(name)?;
    Some(match classify::by_extension(inner) {
        Some(mime) if mime != OCTET_STREAM => ResponseHead::new(mime).gzipped(),
        _ => ResponseHead::untyped().gzipped(),
    })
}

fn strip_gz(path: &Path) -> Option<&Path> {
    let bytes = path.as_os_str().as_bytes();
    let cut = bytes.len().checked_sub(3)?;
    if cut == 0 || !bytes[cut..].eq_ignore_ascii_case(b".gz") {
        return None;
    }
    Some(Path::new(std::ffi::OsStr::from_bytes(&bytes[..cut])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Progress;
    use protocol::Record;
    use std::fs;

    fn head_of(path: &Path) -> String {
        let mut out = Vec::new();
        file_head(path).write_to(&mut out);
        String::from_utf8(out).unwrap()
    }

    fn body(producer: &mut dyn Producer) -> Vec<u8> {
        let mut out = Vec::new();
        producer.preamble(&mut out);
        while producer.produce(&mut out).unwrap() == Progress::Produced {}
        producer.epilogue(&mut out);
        out
    }

    mod gzip {
        use super::*;

        #[test]
        fn known_inner_type_is_kept() {
            let head = head_of(Path::new("/tmp/page.HTML.GZ"));
            assert!(head.contains("Content-Encoding: gzip\r\n"));
            assert!(head.contains("Content-Type: text/html\r\n"));
        }

        #[test]
        fn unknown_inner_type_is_omitted() {
            let head = head_of(Path::new("/tmp/data.bin.gz"));
            assert!(head.contains("Content-Encoding: gzip\r\n"));
            assert!(!head.contains("Content-Type"));
        }

        #[test]
        fn bare_suffix_is_not_gzip() {
            assert_eq!(strip_gz(Path::new(".gz")), None);
            assert_eq!(strip_gz(Path::new("a.gz")), Some(Path::new("a")));
        }
    }

    mod opening {
        use super::*;

        #[test]
        fn regular_file_streams_with_length() {
            let temp = tempfile::tempdir().unwrap();
            let path = temp.path().join("notes.txt");
            fs::write(&path, b"hello").unwrap();

            let mut producer = open_path(&path, ListingStyle::Table).unwrap();
            let mut head = Vec::new();
            producer.head().unwrap().write_to(&mut head);
            let head = String::from_utf8(head).unwrap();
            assert!(head.contains("Content-Type: text/plain\r\n"));
            assert!(head.contains("Content-Length: 5\r\n"));
            assert_eq!(body(producer.as_mut()), b"hello");
        }

        #[test]
        fn directory_renders_a_page() {
            let temp = tempfile::tempdir().unwrap();
            fs::create_dir(temp.path().join("sub")).unwrap();
            fs::write(temp.path().join("a.txt"), b"a").unwrap();

            let mut producer = open_path(temp.path(), ListingStyle::Table).unwrap();
            let html = String::from_utf8(body(producer.as_mut())).unwrap();
            let sub = html.find(">sub</a>").unwrap();
            let file = html.find(">a.txt</a>").unwrap();
            assert!(sub < file);
        }

        #[test]
        fn missing_path_is_not_found() {
            let temp = tempfile::tempdir().unwrap();
            let status = open_path(&temp.path().join("missing"), ListingStyle::Table)
                .err()
                .unwrap();
            assert_eq!(status.code(), 404);
        }

        #[test]
        fn fragment_is_dropped_only_when_needed() {
            let temp = tempfile::tempdir().unwrap();
            let plain = temp.path().join("doc.html");
            let hashed = temp.path().join("odd#name");
            fs::write(&plain, b"x").unwrap();
            fs::write(&hashed, b"y").unwrap();

            let url = format!("file:{}#section", plain.display());
            let resource = ResourceId::parse(FILE_SCHEME, &url).unwrap();
            assert_eq!(local_path(&resource), plain);

            let url = format!("file:{}", hashed.display());
            let resource = ResourceId::parse(FILE_SCHEME, &url).unwrap();
            assert_eq!(local_path(&resource), hashed);
        }

        #[test]
        fn service_rejects_relative_paths() {
            for url in ["file:Cargo.toml", "file:./src", "file:~/notes"] {
                let record = Record::open_url(url);
                let request = Request {
                    url,
                    record: &record,
                    style: ListingStyle::Table,
                };
                assert!(
                    matches!(FileService.open(&request), Err(OpenError::Rejected(_))),
                    "{url}"
                );
            }
        }

        #[test]
        fn empty_file_without_extension_is_binary() {
            let temp = tempfile::tempdir().unwrap();
            let path = temp.path().join("blank");
            fs::write(&path, b"").unwrap();
            assert!(head_of(&path).contains("Content-Type: application/octet-stream\r\n"));
        }

        #[test]
        fn service_rejects_foreign_scheme() {
            let record = Record::open_url("http://example.com/");
            let request = Request {
                url: "http://example.com/",
                record: &record,
                style: ListingStyle::Table,
            };
            assert!(matches!(
                FileService.open(&request),
                Err(OpenError::Rejected(_))
            ));
        }
    }
}
