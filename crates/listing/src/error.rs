use std::io;
use std::path::PathBuf;

/// Failures that prevent a listing from being produced at all.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    /// The directory could not be opened or read.
    #[error("cannot read directory {path}: {source}")]
    Unreadable {
        /// Directory that was scanned.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The archive listing helper could not be started or read.
    #[error("archive helper failed for {archive}: {source}")]
    Helper {
        /// Archive being listed.
        archive: PathBuf,
        /// Underlying failure.
        #[source]
        source: pipeline::PipelineError,
    },
}

impl ListingError {
    /// OS-level error kind behind this failure.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::Unreadable { source, .. } => source.kind(),
            Self::Helper { .. } => io::ErrorKind::Other,
        }
    }
}
