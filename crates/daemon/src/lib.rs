#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `daemon` implements the dpi daemons: small worker processes that serve
//! one class of local resource to the browser over the record protocol from
//! the [`protocol`] crate. Three daemons (`file-dpi`, `zip-dpi`, `man-dpi`)
//! multiplex many connections from one listener; two (`dls-dpi`,
//! `gopher-dpi`) serve exactly one connection on stdin and stdout.
//!
//! # Design
//!
//! - [`connection::Connection`] is the per-peer state machine. It reads and
//!   authenticates records, dispatches the request to a
//!   [`backend::Service`], then sends the begin-response record, the HTTP
//!   head and the body the resulting [`backend::Producer`] yields. Every step
//!   returns as soon as the transport or the body source would block.
//! - [`reactor::Reactor`] owns the listener and all connections and waits on
//!   them with `poll(2)`. [`single_shot::serve_one`] drives the same state
//!   machine in blocking mode.
//! - Services never render errors themselves: they return an
//!   [`ErrorStatus`] and the connection turns it into an error page.
//! - [`run`] mirrors a `main` function: it accepts argument iterators
//!   together with writable handles for standard output and error and
//!   returns the exit status.
//!
//! # Errors
//!
//! Failures inside a connection end only that connection. Failures that end
//! the process are [`DaemonError`]s, whose [`DaemonError::exit_code`] is `1`,
//! or the signal number when a termination signal stopped the daemon.
//!
//! # Examples
//!
//! Render the `--version` banner into an in-memory buffer.
//!
//! ```
//! use daemon::{DaemonKind, run};
//!
//! let mut stdout = Vec::new();
//! let mut stderr = Vec::new();
//! let status = run(DaemonKind::File, ["file-dpi", "--version"], &mut stdout, &mut stderr);
//!
//! assert_eq!(status, 0);
//! assert!(stderr.is_empty());
//! assert!(String::from_utf8(stdout).unwrap().starts_with("file-dpi "));
//! ```

use std::ffi::OsString;
use std::io::{self, Write};

use logging::{LogConfig, Verbosity, init_tracing, targets};
use platform::signal::ShutdownSignals;
use platform::socket::Listener;
use protocol::{Authenticator, SharedKeyAuthenticator};
use tracing::{debug, info};

pub mod backend;
mod cli;
mod config;
pub mod connection;
pub mod dls;
mod error;
pub mod gopher;
mod kind;
mod output;
pub mod reactor;
pub mod render;
pub mod single_shot;
mod status;
mod style;

pub use config::{DaemonConfig, DaemonConfigBuilder, Download, KEYS_FILE_ENV};
pub use error::{DaemonError, FAILURE_EXIT_CODE};
pub use kind::DaemonKind;
pub use status::ErrorStatus;
pub use style::ListingStyle;

use backend::Service;
use backend::archive::ArchiveService;
use backend::file::FileService;
use backend::man::ManService;
use connection::AuthGate;
use dls::DlsService;
use gopher::GopherService;
use reactor::Reactor;
use single_shot::{Duplex, serve_one};

/// Maximum exit code representable by a Unix process.
const MAX_EXIT_CODE: i32 = u8::MAX as i32;

/// Runs the daemon `kind` with the given arguments and output handles.
///
/// Returns the process exit status. Help and version output go to `stdout`;
/// diagnostics go to `stderr`. The single-shot daemons also use `stdout` as
/// their response channel.
pub fn run<I, S, Out, Err>(kind: DaemonKind, arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
    Out: Write,
    Err: Write,
{
    match cli::parse_args(kind, arguments) {
        Ok(parsed) => execute(kind, parsed, stdout, stderr),
        Err(error) => {
            let _ = write!(stderr, "{error}");
            FAILURE_EXIT_CODE
        }
    }
}

fn execute<Out, Err>(kind: DaemonKind, parsed: cli::ParsedArgs, stdout: &mut Out, stderr: &mut Err) -> i32
where
    Out: Write,
    Err: Write,
{
    if parsed.show_help {
        return match stdout.write_all(cli::render_help(kind).as_bytes()) {
            Ok(()) => 0,
            Err(_) => FAILURE_EXIT_CODE,
        };
    }
    if parsed.show_version {
        return match stdout.write_all(cli::render_version(kind).as_bytes()) {
            Ok(()) => 0,
            Err(_) => FAILURE_EXIT_CODE,
        };
    }

    let verbosity = Verbosity::from_flags(parsed.verbose, parsed.quiet);
    init_tracing(&LogConfig::from_env(verbosity));

    let result = config_from(kind, parsed).and_then(|config| run_daemon(&config, stdout));
    match result {
        Ok(()) => 0,
        Err(error) => {
            let _ = writeln!(stderr, "{kind}: {error}");
            error.exit_code()
        }
    }
}

fn config_from(kind: DaemonKind, parsed: cli::ParsedArgs) -> Result<DaemonConfig, DaemonError> {
    let download = match <[OsString; 2]>::try_from(parsed.operands) {
        Ok([url, output]) => Some(Download {
            url: url.to_string_lossy().into_owned(),
            output: output.into(),
        }),
        Err(operands) if operands.is_empty() => None,
        Err(_) => {
            return Err(DaemonError::Config(format!(
                "usage: {} <gopher-url> <output>",
                kind.program_name()
            )));
        }
    };
    DaemonConfig::builder(kind)
        .from_process_env()
        .listen(parsed.listen)
        .keys_file(parsed.keys_file)
        .archiver(parsed.archiver)
        .script_dir(parsed.script_dir)
        .old_style(parsed.old_style)
        .verbosity(Verbosity::from_flags(parsed.verbose, parsed.quiet))
        .download(download)
        .build()
}

/// Runs a configured daemon until it finishes.
///
/// Multiplexed daemons listen on the configured endpoint, or on the socket
/// inherited on stdin, until a peer sends the shutdown command. Single-shot
/// daemons serve one request read from stdin with the reply written to
/// `stdout`.
pub fn run_daemon<Out: Write>(config: &DaemonConfig, stdout: &mut Out) -> Result<(), DaemonError> {
    let kind = config.kind();
    if kind.is_multiplexed() {
        return serve_multiplexed(config);
    }

    if let Some(download) = config.download() {
        let bytes = gopher::download(&download.url, &download.output)?;
        info!(target: targets::HELPER, url = %download.url, bytes, "download complete");
        return Ok(());
    }

    let service = service_for(config);
    let stdin = io::stdin().lock();
    let result = match kind {
        DaemonKind::Dls => {
            let auth = optional_authenticator(config);
            let gate = AuthGate::Optional(auth.as_ref().map(|auth| auth as &dyn Authenticator));
            serve_one(Duplex::new(stdin, &mut *stdout), service.as_ref(), gate)
        }
        _ => {
            let auth = SharedKeyAuthenticator::from_keys_file(config.require_keys_file()?)?;
            serve_one(
                Duplex::new(stdin, &mut *stdout),
                service.as_ref(),
                AuthGate::Required(&auth),
            )
        }
    };
    stdout.flush()?;
    result
}

fn serve_multiplexed(config: &DaemonConfig) -> Result<(), DaemonError> {
    let authenticator = SharedKeyAuthenticator::from_keys_file(config.require_keys_file()?)?;
    let listener = match config.listen() {
        Some(addr) => Listener::bind(addr).map_err(|source| DaemonError::Listen {
            endpoint: addr.to_string(),
            source,
        })?,
        None => Listener::inherit_stdin().map_err(|source| DaemonError::Listen {
            endpoint: "stdin".to_owned(),
            source,
        })?,
    };
    let signals = ShutdownSignals::install().map_err(DaemonError::Signals)?;
    debug!(target: targets::REACTOR, endpoint = ?config.listen(), "listening");
    Reactor::new(listener, service_for(config), Box::new(authenticator))
        .with_style(config.style())
        .with_signals(signals)
        .run()
}

fn optional_authenticator(config: &DaemonConfig) -> Option<SharedKeyAuthenticator> {
    let path = config.keys_file()?;
    match SharedKeyAuthenticator::from_keys_file(path) {
        Ok(auth) => Some(auth),
        Err(error) => {
            debug!(target: targets::AUTH, %error, "no key available, auth records are not checked");
            None
        }
    }
}

fn service_for(config: &DaemonConfig) -> Box<dyn Service> {
    match config.kind() {
        DaemonKind::File => Box::new(FileService),
        DaemonKind::Zip => Box::new(ArchiveService::new(config.archiver().tool())),
        DaemonKind::Man => Box::new(ManService),
        DaemonKind::Dls => Box::new(DlsService::new(config.script_dir())),
        DaemonKind::Gopher => Box::new(GopherService),
    }
}

/// Converts a numeric exit code into an [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, MAX_EXIT_CODE);
    std::process::ExitCode::from(u8::try_from(clamped).unwrap_or(u8::MAX))
}
