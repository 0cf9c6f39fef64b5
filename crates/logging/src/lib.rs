#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` turns the `-v`/`-q` flags of a dpi daemon into a
//! [`tracing`] subscriber that writes human-readable diagnostics to stderr.
//! Stdout is never touched because the single-shot daemons use it as the
//! response channel.
//!
//! # Design
//!
//! - [`Verbosity`] is the coarse level chosen on the command line.
//! - [`LogConfig`] pairs the verbosity with optional filter directives taken
//!   from the `DPI_LOG` environment variable, which override the level when
//!   present.
//! - [`init_tracing`] installs the global subscriber once; later calls are
//!   no-ops so tests and embedded callers can invoke it freely.
//! - Events are grouped by target. The daemons log under the
//!   [`targets`] constants so `DPI_LOG=dpi::conn=trace` narrows output to one
//!   concern.
//!
//! # Examples
//!
//! ```
//! use logging::{LogConfig, Verbosity, build_filter};
//!
//! let config = LogConfig::new(Verbosity::from_flags(2, false));
//! assert_eq!(build_filter(&config).to_string(), "debug");
//! ```

mod config;
mod subscriber;
mod verbosity;

pub use config::{LOG_ENV, LogConfig};
pub use subscriber::{build_filter, init_tracing};
pub use verbosity::Verbosity;

/// Targets used by the daemons for grouped diagnostics.
pub mod targets {
    /// Connection lifecycle and state transitions.
    pub const CONN: &str = "dpi::conn";
    /// Authentication checks.
    pub const AUTH: &str = "dpi::auth";
    /// Helper processes and pipelines.
    pub const HELPER: &str = "dpi::helper";
    /// Listener setup and the event loop.
    pub const REACTOR: &str = "dpi::reactor";
}
