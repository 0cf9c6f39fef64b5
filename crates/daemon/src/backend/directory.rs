//! Directory and archive listing pages.

use std::fmt;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::SystemTime;

use listing::classify::classify_file;
use listing::{Entry, Listing};

use super::{CHUNK_LEN, Producer, Progress, ResponseHead};
use crate::render::{self, PageContext};
use crate::style::ListingStyle;

/// Looks up the content type of a listed entry.
pub type Classifier = Box<dyn FnMut(&Entry) -> Option<&'static str>>;

/// Renders a [`Listing`] as an HTML page, a batch of rows per step.
pub struct DirectoryProducer {
    scheme: &'static str,
    parent_scheme: &'static str,
    toggle_url: &'static str,
    directory: Vec<u8>,
    style: ListingStyle,
    listing: Listing,
    next: usize,
    classify: Classifier,
    now: SystemTime,
}

impl DirectoryProducer {
    /// A page for `directory` under `scheme`.
    ///
    /// Entries are classified with [`classify_file`] unless
    /// another classifier is supplied.
    pub fn new(
        scheme: &'static str,
        toggle_url: &'static str,
        directory: &Path,
        listing: Listing,
        style: ListingStyle,
    ) -> Self {
        let mut directory = directory.as_os_str().as_bytes().to_vec();
        if directory.last() != Some(&b'/') {
            directory.push(b'/');
        }
        Self {
            scheme,
            parent_scheme: scheme,
            toggle_url,
            directory,
            style,
            listing,
            next: 0,
            classify: Box::new(|entry: &Entry| classify_file(entry.reference())),
            now: SystemTime::now(),
        }
    }

    /// Links the parent directory under another scheme.
    #[must_use]
    pub fn with_parent_scheme(mut self, scheme: &'static str) -> Self {
        self.parent_scheme = scheme;
        self
    }

    /// Replaces the entry classifier.
    #[must_use]
    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    /// Fixes the clock used to age modification times.
    #[must_use]
    pub fn with_now(mut self, now: SystemTime) -> Self {
        self.now = now;
        self
    }

    fn page(&self) -> PageContext<'_> {
        PageContext {
            scheme: self.scheme,
            directory: &self.directory,
            parent_scheme: self.parent_scheme,
            toggle_url: self.toggle_url,
            style: self.style,
        }
    }
}

impl fmt::Debug for DirectoryProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryProducer")
            .field("scheme", &self.scheme)
            .field("directory", &String::from_utf8_lossy(&self.directory))
            .field("style", &self.style)
            .field("entries", &self.listing.len())
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl Producer for DirectoryProducer {
    fn head(&self) -> Option<ResponseHead> {
        Some(ResponseHead::html())
    }

    fn preamble(&mut self, out: &mut Vec<u8>) {
        let page = self.page();
        render::page_header(out, &page);
        render::parent_link(out, &page);
        render::toggle_link(out, &page);
        render::table_header(out, self.listing.len(), self.style);
    }

    fn produce(&mut self, out: &mut Vec<u8>) -> io::Result<Progress> {
        if self.next >= self.listing.len() {
            return Ok(Progress::Finished);
        }
        let start = out.len();
        while let Some(entry) = self.listing.get(self.next) {
            let content_type = if entry.is_dir() || entry.is_executable() {
                None
            } else {
                (self.classify)(entry)
            };
            render::entry_row(out, entry, self.next, content_type, self.style, self.now);
            self.next += 1;
            if out.len() - start >= CHUNK_LEN {
                break;
            }
        }
        Ok(Progress::Produced)
    }

    fn epilogue(&mut self, out: &mut Vec<u8>) {
        render::table_footer(out, self.listing.len(), self.style);
        render::page_footer(out, self.style);
    }
}
