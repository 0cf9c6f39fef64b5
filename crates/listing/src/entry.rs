use std::borrow::Cow;
use std::cmp::Ordering;
use std::ffi::{OsStr, OsString};
use std::fs::Metadata;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const MODE_TYPE_MASK: u32 = 0o170_000;
const MODE_DIRECTORY: u32 = 0o040_000;
const MODE_REGULAR: u32 = 0o100_000;
const MODE_ANY_EXECUTE: u32 = 0o111;

/// One item of a [`Listing`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Entry {
    name: OsString,
    reference: PathBuf,
    size: u64,
    mode: u32,
    modified: SystemTime,
}

impl Entry {
    /// Creates an entry from its parts.
    pub fn new(
        name: impl Into<OsString>,
        reference: impl Into<PathBuf>,
        size: u64,
        mode: u32,
        modified: SystemTime,
    ) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            size,
            mode,
            modified,
        }
    }

    /// Builds an entry from filesystem metadata.
    pub fn from_metadata(name: OsString, reference: PathBuf, metadata: &Metadata) -> Self {
        Self::new(
            name,
            reference,
            metadata.len(),
            metadata.mode(),
            metadata.modified().unwrap_or(UNIX_EPOCH),
        )
    }

    /// A regular archive member with mode `0644`.
    pub fn archive_file(
        name: impl Into<OsString>,
        reference: impl Into<PathBuf>,
        size: u64,
        modified: SystemTime,
    ) -> Self {
        Self::new(name, reference, size, MODE_REGULAR | 0o644, modified)
    }

    /// An archive directory member with mode `0755`.
    pub fn archive_directory(
        name: impl Into<OsString>,
        reference: impl Into<PathBuf>,
        modified: SystemTime,
    ) -> Self {
        Self::new(name, reference, 0, MODE_DIRECTORY | 0o755, modified)
    }

    /// Name shown to the user.
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// Lossy UTF-8 rendering of [`name`](Self::name).
    pub fn display_name(&self) -> Cow<'_, str> {
        self.name.to_string_lossy()
    }

    /// Path (or archive member path) that addresses this entry.
    pub fn reference(&self) -> &Path {
        &self.reference
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Unix mode bits.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Last modification time.
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_DIRECTORY
    }

    /// Returns `true` when any execute bit is set on a non-directory.
    pub fn is_executable(&self) -> bool {
        !self.is_dir() && self.mode & MODE_ANY_EXECUTE != 0
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .is_dir()
            .cmp(&self.is_dir())
            .then_with(|| self.name.as_bytes().cmp(other.name.as_bytes()))
            .then_with(|| self.reference.cmp(&other.reference))
            .then_with(|| self.size.cmp(&other.size))
            .then_with(|| self.mode.cmp(&other.mode))
            .then_with(|| self.modified.cmp(&other.modified))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Entries of a directory or archive, kept in display order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    entries: Vec<Entry>,
}

impl Listing {
    /// Sorts `entries` into display order.
    pub fn from_entries(mut entries: Vec<Entry>) -> Self {
        entries.sort_unstable();
        Self { entries }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the listing has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Iterates in display order.
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Entries in display order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for Listing {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<Entry> for Listing {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().collect())
    }
}
