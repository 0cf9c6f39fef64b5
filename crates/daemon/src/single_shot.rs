//! Daemons that serve exactly one connection over stdin and stdout.
//!
//! The connection state machine runs unchanged; the driver below simply
//! blocks where the reactor would wait.

use std::io::{self, Read, Write};

use logging::targets;
use platform::poll::{Interest, PollSet};
use tracing::{debug, warn};

use crate::backend::Service;
use crate::connection::{AuthGate, Connection, ConnectionError, ConnectionId, Context, Wants};
use crate::error::DaemonError;
use crate::style::ListingStyle;

/// A reader and a writer used as one transport.
#[derive(Debug)]
pub struct Duplex<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> Duplex<R, W> {
    /// Joins `reader` and `writer`.
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: Read, W> Read for Duplex<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R, W: Write> Write for Duplex<R, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl From<ConnectionError> for DaemonError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::AuthFailed => Self::AuthFailed,
            ConnectionError::Protocol(reason) => Self::Protocol(reason),
            ConnectionError::Record(error) => Self::Record(error),
            ConnectionError::Io(error) => Self::Io(error),
        }
    }
}

/// Serves one connection over `transport` until its response is sent.
pub fn serve_one<T: Read + Write>(
    transport: T,
    service: &dyn Service,
    auth: AuthGate<'_>,
) -> Result<(), DaemonError> {
    let mut style = ListingStyle::default();
    let mut shutdown = false;
    let mut ctx = Context {
        service,
        auth,
        style: &mut style,
        shutdown: &mut shutdown,
    };
    let mut conn = Connection::new(ConnectionId::new(0), transport, auth);
    let result = drive(&mut conn, &mut ctx);
    match &result {
        Ok(()) => debug!(target: targets::CONN, scheme = service.scheme(), "single request served"),
        Err(error) => warn!(target: targets::CONN, scheme = service.scheme(), %error, "single request failed"),
    }
    result.map_err(DaemonError::from)
}

fn drive<T: Read + Write>(
    conn: &mut Connection<T>,
    ctx: &mut Context<'_>,
) -> Result<(), ConnectionError> {
    loop {
        match conn.wants() {
            Wants::Read => conn.on_readable(ctx)?,
            Wants::Write => conn.on_writable()?,
            Wants::Source => {
                if let Some(fd) = conn.source_fd() {
                    let mut poll = PollSet::with_capacity(1);
                    poll.register(fd, Interest::READ);
                    poll.wait(None)?;
                }
                conn.on_writable()?;
            }
            Wants::Nothing => return Ok(()),
        }
    }
}
