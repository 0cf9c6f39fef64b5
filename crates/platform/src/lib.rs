#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `platform` isolates the operating-system primitives the dpi daemons need
//! beyond what the standard library offers: readiness polling across an
//! arbitrary descriptor set, toggling `O_NONBLOCK` on helper pipes, adopting a
//! listening socket handed over on standard input, and recording termination
//! signals. It is the only crate in the workspace that contains `unsafe`
//! code, and every such block lives in [`poll`] or [`fd`].
//!
//! # Design
//!
//! - [`poll::PollSet`] wraps `poll(2)`. It borrows the registered descriptors
//!   for its own lifetime and hands back plain [`poll::Readiness`] values, so
//!   callers can mutate their connections as soon as a wait returns.
//! - [`socket::Listener`] and [`socket::Stream`] unify Unix-domain and TCP
//!   endpoints behind one non-blocking interface.
//! - [`signal::ShutdownSignals`] registers SIGINT, SIGTERM and SIGHUP through
//!   `signal-hook` and remembers the last signal delivered.
//!
//! # Errors
//!
//! System call failures surface as [`std::io::Error`]. Address parsing and
//! listener adoption report [`PlatformError`].

pub mod fd;
pub mod poll;
pub mod signal;
pub mod socket;

mod error;

pub use error::PlatformError;
