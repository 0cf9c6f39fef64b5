//! Process-level failures of a dpi daemon.
//!
//! Everything that goes wrong inside one connection is answered on that
//! connection and never reaches this type. [`DaemonError`] only covers
//! failures that end the process, and each variant knows the exit status the
//! binary should report.

use std::io;
use std::path::PathBuf;

use platform::PlatformError;
use protocol::{AuthError, RecordError};

/// Status returned for every failure that is not a signal.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Error that terminates a daemon process.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The keys file could not be used.
    #[error("cannot load authentication key: {0}")]
    Keys(#[from] AuthError),
    /// A command-line option has an unusable value.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// No keys file location could be determined.
    #[error("no keys file given and HOME is not set")]
    NoKeysFile,
    /// The listening endpoint could not be set up.
    #[error("cannot listen on {endpoint}: {source}")]
    Listen {
        /// Requested endpoint.
        endpoint: String,
        /// Underlying failure.
        #[source]
        source: PlatformError,
    },
    /// The peer failed authentication on a single-shot daemon.
    #[error("authentication failed")]
    AuthFailed,
    /// The peer sent something other than a well-formed request.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A malformed record arrived on a single-shot daemon.
    #[error("malformed record: {0}")]
    Record(#[from] RecordError),
    /// The event loop itself failed.
    #[error("event loop failed: {0}")]
    Reactor(#[source] io::Error),
    /// Signal handlers could not be installed.
    #[error("cannot install signal handlers: {0}")]
    Signals(#[source] io::Error),
    /// A download could not be completed.
    #[error("cannot download {url} to {}: {reason}", output.display())]
    Download {
        /// Requested url.
        url: String,
        /// Destination file.
        output: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// Writing the response failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A termination signal stopped the daemon.
    #[error("terminated by signal {0}")]
    Signal(i32),
}

impl DaemonError {
    /// Exit status the binary should report for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Signal(signal) => *signal,
            _ => FAILURE_EXIT_CODE,
        }
    }
}
