#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `listing` models what the dpi daemons show for a container resource and
//! decides how individual resources are labelled. It scans filesystem
//! directories, parses the tables printed by archive tools, and maps names
//! or leading bytes to MIME types.
//!
//! # Design
//!
//! - [`Entry`] captures the display name, the reference used to build links,
//!   size, mode bits and modification time of one item.
//! - [`Listing`] owns entries sorted by a strict total order: directories
//!   first, then byte-wise name order, with the remaining fields breaking any
//!   tie.
//! - [`scan_directory`] enumerates a directory, hiding dotfiles and editor
//!   backups and silently skipping entries whose metadata cannot be read.
//! - [`ArchiveTool`] is the pluggable strategy for archive helpers: it builds
//!   the listing and extraction commands and parses one row of the listing
//!   table. [`Unzip`] and [`SevenZip`] are the shipped strategies and
//!   [`ArchiverKind`] selects one from configuration.
//! - [`classify`] holds the extension table, the magic-byte sniffer and the
//!   printable-ratio fallback.
//!
//! # Invariants
//!
//! - Scanning the same unchanged directory twice yields equal listings.
//! - A recognised extension always wins over data sniffing.
//!
//! # Errors
//!
//! [`ListingError`] reports an unreadable directory or a failed archive
//! helper. Individual unreadable entries and malformed table rows never fail a
//! whole scan.
//!
//! # Examples
//!
//! ```
//! use listing::scan_directory;
//! use std::fs;
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let temp = tempfile::tempdir()?;
//! fs::write(temp.path().join("b.txt"), b"b")?;
//! fs::create_dir(temp.path().join("z"))?;
//! fs::write(temp.path().join(".hidden"), b"")?;
//!
//! let listing = scan_directory(temp.path())?;
//! let names: Vec<_> = listing.iter().map(|e| e.display_name().into_owned()).collect();
//! assert_eq!(names, ["z", "b.txt"]);
//! # Ok(())
//! # }
//! # demo().unwrap();
//! ```

pub mod classify;

mod archive;
mod entry;
mod error;
mod scan;

pub use archive::{
    ArchiveRow, ArchiveTool, ArchiverKind, SevenZip, Unzip, parse_archive_listing, scan_archive,
    sniff_member,
};
pub use entry::{Entry, Listing};
pub use error::ListingError;
pub use scan::{is_hidden_name, scan_directory};
