//! Archive listings and members, read through an external archiver.

use std::path::Path;

use listing::classify::{self, OCTET_STREAM};
use listing::{ArchiveTool, Entry, Listing, scan_archive, sniff_member};
use logging::targets;
use pipeline::{ArchivePath, PipelineBuilder, ShellSafePath, resolve_archive_path};
use protocol::ResourceId;
use tracing::{debug, warn};

use super::directory::DirectoryProducer;
use super::file::gzip_head;
use super::stream::StreamProducer;
use super::{OpenError, Producer, Request, ResponseHead, Service, require_absolute};
use crate::status::ErrorStatus;
use crate::style::ListingStyle;

/// Scheme served by [`ArchiveService`].
pub const ZIP_SCHEME: &str = "zip";

/// Pseudo-url that flips the listing style of archive pages.
pub const ZIP_TOGGLE_URL: &str = "dpi:/zip/toggle";

/// Serves `zip:` urls naming an archive or a member inside one.
#[derive(Clone, Copy, Debug)]
pub struct ArchiveService {
    tool: &'static dyn ArchiveTool,
}

impl ArchiveService {
    /// A service reading archives with `tool`.
    pub const fn new(tool: &'static dyn ArchiveTool) -> Self {
        Self { tool }
    }

    fn open_listing(
        &self,
        target: &ArchivePath,
        style: ListingStyle,
    ) -> Result<Box<dyn Producer>, ErrorStatus> {
        let archive = target.archive().clone();
        let listing = scan_archive(self.tool, &archive)?;
        let (directory, listing, parent_scheme) = match target.member() {
            Some(prefix) => {
                let directory = archive.as_path().join(prefix.as_path());
                (directory.clone(), below(listing, &directory), ZIP_SCHEME)
            }
            None => (archive.as_path().to_path_buf(), listing, "file"),
        };
        let tool = self.tool;
        let page = DirectoryProducer::new(ZIP_SCHEME, ZIP_TOGGLE_URL, &directory, listing, style)
            .with_parent_scheme(parent_scheme)
            .with_classifier(Box::new(move |entry: &Entry| {
                classify_member(tool, &archive, entry.reference())
            }));
        Ok(Box::new(page))
    }

    fn open_member(
        &self,
        archive: &ShellSafePath,
        member: &ShellSafePath,
    ) -> Result<Box<dyn Producer>, ErrorStatus> {
        let head = member_head(self.tool, archive, member);
        let pipeline = PipelineBuilder::new()
            .stage(self.tool.extract_stage(archive, member))
            .spawn()
            .map_err(|error| ErrorStatus::internal(error.to_string()))?;
        pipeline
            .set_nonblocking(true)
            .map_err(|error| ErrorStatus::internal(error.to_string()))?;
        debug!(
            target: targets::HELPER,
            archive = %archive,
            member = %member,
            content_type = head.content_type().unwrap_or("-"),
            "streaming archive member"
        );
        Ok(Box::new(StreamProducer::new(head, pipeline)))
    }
}

impl Service for ArchiveService {
    fn scheme(&self) -> &'static str {
        ZIP_SCHEME
    }

    fn toggle_url(&self) -> Option<&'static str> {
        Some(ZIP_TOGGLE_URL)
    }

    fn open(&self, request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError> {
        let resource = ResourceId::parse(ZIP_SCHEME, request.url)?;
        require_absolute(&resource)?;
        let target = resolve_archive_path(resource.path()).map_err(ErrorStatus::from)?;
        let producer = match target.member() {
            Some(member) if !target.is_listing() => self.open_member(target.archive(), member)?,
            _ => self.open_listing(&target, request.style)?,
        };
        Ok(producer)
    }
}

/// Entries strictly inside `directory`.
fn below(listing: Listing, directory: &Path) -> Listing {
    listing
        .into_iter()
        .filter(|entry| entry.reference().starts_with(directory) && entry.reference() != directory)
        .collect()
}

/// Headers for `member`. A `.gz` member is typed by its inner name; anything
/// else is classified by extension, then by the first extracted bytes.
fn member_head(
    tool: &dyn ArchiveTool,
    archive: &ShellSafePath,
    member: &ShellSafePath,
) -> ResponseHead {
    gzip_head(member.as_path()).unwrap_or_else(|| {
        let content_type = classify::classify(member.as_path(), || {
            sniff_member(tool, archive, member)
        });
        ResponseHead::new(content_type.unwrap_or(OCTET_STREAM))
    })
}

/// Content type of the member at `reference`, sniffing through the
/// extractor when the extension is not recognised.
fn classify_member(
    tool: &dyn ArchiveTool,
    archive: &ShellSafePath,
    reference: &Path,
) -> Option<&'static str> {
    classify::classify(reference, || {
        let member = reference.strip_prefix(archive.as_path()).ok()?;
        match ShellSafePath::new(member) {
            Ok(member) => sniff_member(tool, archive, &member),
            Err(error) => {
                warn!(target: targets::HELPER, member = %member.display(), %error, "not sniffing member");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use listing::ArchiverKind;
    use protocol::Record;
    use std::fs;
    use std::time::UNIX_EPOCH;

    fn request<'a>(record: &'a Record, url: &'a str) -> Request<'a> {
        Request {
            url,
            record,
            style: ListingStyle::Table,
        }
    }

    #[test]
    fn metacharacters_are_not_found() {
        let service = ArchiveService::new(ArchiverKind::Unzip.tool());
        let record = Record::open_url("zip:/tmp/a$(id).zip");
        let result = service.open(&request(&record, "zip:/tmp/a$(id).zip"));
        match result {
            Err(OpenError::Status(status)) => assert_eq!(status.code(), 404),
            _ => panic!("expected a 404 status"),
        }
    }

    #[test]
    fn directory_in_place_of_archive_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let url = format!("zip:{}", temp.path().display());
        let record = Record::open_url(url.clone());
        let service = ArchiveService::new(ArchiverKind::SevenZip.tool());
        match service.open(&request(&record, &url)) {
            Err(OpenError::Status(status)) => assert_eq!(status.code(), 404),
            _ => panic!("expected a 404 status"),
        }
    }

    #[test]
    fn relative_archive_path_is_rejected() {
        let service = ArchiveService::new(ArchiverKind::Unzip.tool());
        let record = Record::open_url("zip:rel/a.zip");
        assert!(matches!(
            service.open(&request(&record, "zip:rel/a.zip")),
            Err(OpenError::Rejected(_))
        ));
    }

    mod member_heads {
        use super::*;

        fn head_text(member: &str) -> String {
            let temp = tempfile::tempdir().unwrap();
            let archive_path = temp.path().join("a.zip");
            fs::write(&archive_path, b"not really a zip").unwrap();
            let archive = ShellSafePath::new(&archive_path).unwrap();
            let member = ShellSafePath::new(member).unwrap();
            let mut out = Vec::new();
            member_head(ArchiverKind::Unzip.tool(), &archive, &member).write_to(&mut out);
            String::from_utf8(out).unwrap()
        }

        #[test]
        fn gzip_member_with_unknown_inner_type_is_untyped() {
            let head = head_text("data.bin.gz");
            assert!(head.contains("Content-Encoding: gzip\r\n"));
            assert!(!head.contains("Content-Type"));
        }

        #[test]
        fn gzip_member_keeps_known_inner_type() {
            let head = head_text("docs/page.html.gz");
            assert!(head.contains("Content-Encoding: gzip\r\n"));
            assert!(head.contains("Content-Type: text/html\r\n"));
        }

        #[test]
        fn plain_member_is_typed_by_extension() {
            let head = head_text("pics/cat.png");
            assert!(head.contains("Content-Type: image/png\r\n"));
            assert!(!head.contains("Content-Encoding"));
        }
    }

    #[test]
    fn subdirectory_listing_keeps_only_nested_entries() {
        let listing = Listing::from_entries(vec![
            Entry::archive_directory("docs", "/a.zip/docs/", UNIX_EPOCH),
            Entry::archive_file("docs/x.txt", "/a.zip/docs/x.txt", 1, UNIX_EPOCH),
            Entry::archive_file("top.txt", "/a.zip/top.txt", 1, UNIX_EPOCH),
        ]);
        let nested = below(listing, Path::new("/a.zip/docs"));
        let names: Vec<_> = nested.iter().map(|e| e.display_name().into_owned()).collect();
        assert_eq!(names, ["docs/x.txt"]);
    }

    #[test]
    fn member_extension_skips_sniffing() {
        let temp = tempfile::tempdir().unwrap();
        let archive_path = temp.path().join("a.zip");
        fs::write(&archive_path, b"not really a zip").unwrap();
        let archive = ShellSafePath::new(&archive_path).unwrap();
        let reference = archive_path.join("pics/cat.png");
        assert_eq!(
            classify_member(ArchiverKind::Unzip.tool(), &archive, &reference),
            Some("image/png")
        );
    }
}
