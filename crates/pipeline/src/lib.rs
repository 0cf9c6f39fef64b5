#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `pipeline` runs the external helpers the dpi daemons rely on (`man`,
//! `col`, `unzip`, `7z`, local scripts) and exposes their combined output as a
//! single readable stream. It also validates and resolves request paths before
//! they reach a helper.
//!
//! # Design
//!
//! - [`PipelineBuilder`] takes an ordered list of [`Stage`]s and spawns them
//!   with each stage's stdout wired into the next stage's stdin. The returned
//!   [`Pipeline`] reads from the last stage and owns every child.
//! - [`Stage::exec`] passes a literal argument vector to the program; no
//!   shell is involved.
//! - [`Stage::shell`] runs a [`ShellCommand`] through `/bin/sh -c`. A
//!   [`ShellCommand`] can only be assembled from `'static` literals and
//!   [`ShellSafePath`] values, and a [`ShellSafePath`] cannot hold any shell
//!   metacharacter, so request data never reaches the shell unchecked.
//! - [`resolve_archive_path`] splits `archive.zip/inner/member` at the longest
//!   prefix that exists as a non-directory file.
//!
//! # Invariants
//!
//! - Every spawned child is reaped exactly once: by [`Pipeline::finish`] after
//!   the stream is drained, or by `Drop` (which kills stages still running).
//! - Path validation happens before any filesystem access.
//!
//! # Examples
//!
//! ```no_run
//! use pipeline::{PipelineBuilder, Stage};
//! use std::io::Read;
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = PipelineBuilder::new()
//!     .stage(Stage::exec("man", ["--", "ls"]))
//!     .stage(Stage::exec("col", ["-b"]))
//!     .spawn()?;
//! let mut text = String::new();
//! pipeline.read_to_string(&mut text)?;
//! pipeline.finish()?;
//! # Ok(())
//! # }
//! ```

mod path;
mod process;

pub use path::{
    ArchivePath, ResolveError, ResolvedPath, SHELL_METACHARACTERS, ShellSafePath,
    resolve_archive_path, resolve_existing_file,
};
pub use process::{Pipeline, PipelineBuilder, PipelineError, ShellCommand, Stage};
