//! Per-connection state machine.
//!
//! A [`Connection`] owns its transport, the bytes it still has to send and
//! the [`Producer`] of the response in flight. The reactor calls
//! [`Connection::on_readable`] and [`Connection::on_writable`] when the
//! descriptor named by [`Connection::wants`] becomes ready; neither call
//! blocks on a non-blocking transport, and a step that cannot progress
//! returns without changing state.
//!
//! ```text
//! AwaitingAuth -> AwaitingRequest -> Start -> ProtocolHeaderSent
//!     -> HttpHeaderSent -> BodyStreaming -> Content -> Flushing -> Done
//! ```
//!
//! A request that fails to open moves to `Err`, which sends one complete
//! error page and then flushes like any other response.

use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::BorrowedFd;

use logging::targets;
use protocol::{Authenticator, Record, RecordDecoder, RecordError, command};
use tracing::{debug, info, trace, warn};

use crate::backend::{OpenError, Producer, Progress, Request, Service};
use crate::output::OutputBuffer;
use crate::render;
use crate::status::ErrorStatus;
use crate::style::ListingStyle;

/// Bytes read from the transport per attempt.
const READ_LEN: usize = 4096;

/// Body steps taken in one writable turn before yielding to other
/// connections.
const STEPS_PER_TURN: usize = 16;

/// Identifies one accepted connection in logs and in the registry.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the numeric value of this connection ID.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a connection proves it may issue requests.
#[derive(Clone, Copy)]
pub enum AuthGate<'a> {
    /// The first record must pass the authenticator.
    Required(&'a dyn Authenticator),
    /// An `auth` record is checked if one arrives; requests may also come
    /// without one.
    Optional(Option<&'a dyn Authenticator>),
}

impl fmt::Debug for AuthGate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required(_) => f.write_str("Required"),
            Self::Optional(auth) => write!(f, "Optional({})", auth.is_some()),
        }
    }
}

/// Process-wide state a connection may read or change while dispatching.
pub struct Context<'a> {
    /// The daemon's backend.
    pub service: &'a dyn Service,
    /// Authentication policy.
    pub auth: AuthGate<'a>,
    /// Listing style for newly dispatched requests.
    pub style: &'a mut ListingStyle,
    /// Set when a peer asked the daemon to exit.
    pub shutdown: &'a mut bool,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("scheme", &self.service.scheme())
            .field("auth", &self.auth)
            .field("style", &self.style)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

/// Failures that end one connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer did not authenticate.
    #[error("authentication failed")]
    AuthFailed,
    /// The peer sent a request the daemon cannot act on.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The peer sent a malformed record.
    #[error(transparent)]
    Record(#[from] RecordError),
    /// The transport or the resource failed mid-response.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What the connection needs before it can make progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wants {
    /// More bytes from the peer.
    Read,
    /// Room on the transport.
    Write,
    /// Data from the producer's source descriptor.
    Source,
    /// Nothing; the connection is finished.
    Nothing,
}

struct Response {
    url: String,
    producer: Box<dyn Producer>,
}

enum State {
    AwaitingAuth,
    AwaitingRequest,
    Start(Response),
    ProtocolHeaderSent(Response),
    HttpHeaderSent(Response),
    BodyStreaming(Response),
    Content(Response),
    Err { url: String, status: ErrorStatus },
    Flushing,
    Done,
    Failed,
}

impl State {
    const fn name(&self) -> &'static str {
        match self {
            Self::AwaitingAuth => "awaiting-auth",
            Self::AwaitingRequest => "awaiting-request",
            Self::Start(_) => "start",
            Self::ProtocolHeaderSent(_) => "protocol-header-sent",
            Self::HttpHeaderSent(_) => "http-header-sent",
            Self::BodyStreaming(_) => "body-streaming",
            Self::Content(_) => "content",
            Self::Err { .. } => "error",
            Self::Flushing => "flushing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// One served peer.
pub struct Connection<T> {
    id: ConnectionId,
    transport: T,
    decoder: RecordDecoder,
    output: OutputBuffer,
    state: State,
    waiting_on_source: bool,
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state.name())
            .field("pending", &self.output.pending())
            .field("waiting_on_source", &self.waiting_on_source)
            .finish_non_exhaustive()
    }
}

impl<T: Read + Write> Connection<T> {
    /// A fresh connection over `transport`.
    pub fn new(id: ConnectionId, transport: T, auth: AuthGate<'_>) -> Self {
        let state = match auth {
            AuthGate::Required(_) => State::AwaitingAuth,
            AuthGate::Optional(_) => State::AwaitingRequest,
        };
        Self {
            id,
            transport,
            decoder: RecordDecoder::new(),
            output: OutputBuffer::new(),
            state,
            waiting_on_source: false,
        }
    }

    /// The connection's identifier.
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Name of the current state, for diagnostics.
    pub const fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Returns `true` once the connection can be dropped.
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, State::Done | State::Failed)
    }

    /// Returns `true` while no request has been accepted.
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingAuth | State::AwaitingRequest)
    }

    /// What to wait for before the next step.
    pub fn wants(&self) -> Wants {
        match self.state {
            State::AwaitingAuth | State::AwaitingRequest => Wants::Read,
            State::Done | State::Failed => Wants::Nothing,
            _ if self.waiting_on_source && self.source_fd().is_some() => Wants::Source,
            _ => Wants::Write,
        }
    }

    /// Descriptor of the resource being streamed, if it can block.
    pub fn source_fd(&self) -> Option<BorrowedFd<'_>> {
        match &self.state {
            State::BodyStreaming(response) => response.producer.source_fd(),
            _ => None,
        }
    }

    /// Reads and dispatches records until the transport would block or a
    /// request has been accepted.
    pub fn on_readable(&mut self, ctx: &mut Context<'_>) -> Result<(), ConnectionError> {
        let result = self.read_requests(ctx);
        self.settle(result)
    }

    /// Sends queued bytes and advances the response.
    pub fn on_writable(&mut self) -> Result<(), ConnectionError> {
        self.waiting_on_source = false;
        let result = self.write_response();
        self.settle(result)
    }

    fn settle(&mut self, result: Result<(), ConnectionError>) -> Result<(), ConnectionError> {
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    fn read_requests(&mut self, ctx: &mut Context<'_>) -> Result<(), ConnectionError> {
        let mut buf = [0u8; READ_LEN];
        while self.is_idle() {
            while self.is_idle() {
                match self.decoder.next_record()? {
                    Some(record) => self.dispatch(record, ctx)?,
                    None => break,
                }
            }
            if !self.is_idle() {
                break;
            }
            match self.transport.read(&mut buf) {
                Ok(0) => {
                    debug!(target: targets::CONN, conn = %self.id, "peer closed before a request");
                    self.state = State::Done;
                }
                Ok(read) => self.decoder.feed(&buf[..read]),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, record: Record, ctx: &mut Context<'_>) -> Result<(), ConnectionError> {
        trace!(target: targets::CONN, conn = %self.id, command = record.command(), "record received");
        if matches!(self.state, State::AwaitingAuth) {
            let AuthGate::Required(auth) = ctx.auth else {
                self.state = State::AwaitingRequest;
                return self.dispatch(record, ctx);
            };
            if !auth.check(&record) {
                warn!(target: targets::AUTH, conn = %self.id, "authentication failed");
                return Err(ConnectionError::AuthFailed);
            }
            debug!(target: targets::AUTH, conn = %self.id, "authenticated");
            self.state = State::AwaitingRequest;
            return Ok(());
        }

        match record.command() {
            Some(command::AUTH) => {
                if let AuthGate::Optional(Some(auth)) = ctx.auth {
                    if !auth.check(&record) {
                        warn!(target: targets::AUTH, conn = %self.id, "authentication failed");
                        return Err(ConnectionError::AuthFailed);
                    }
                    debug!(target: targets::AUTH, conn = %self.id, "authenticated");
                }
                return Ok(());
            }
            Some(command::BYE) => {
                info!(target: targets::CONN, conn = %self.id, "shutdown requested");
                *ctx.shutdown = true;
                self.state = State::Done;
                return Ok(());
            }
            _ => {}
        }

        let Some(url) = record.get("url") else {
            return Err(ConnectionError::Protocol(format!(
                "request without url: {record}"
            )));
        };
        let url = url.to_owned();

        if ctx.service.toggle_url() == Some(url.as_str()) {
            *ctx.style = ctx.style.toggled();
            info!(target: targets::CONN, conn = %self.id, style = ?*ctx.style, "listing style toggled");
            self.output.extend(&Record::reload_request().encode());
            self.state = State::Flushing;
            return Ok(());
        }

        let request = Request {
            url: &url,
            record: &record,
            style: *ctx.style,
        };
        match ctx.service.open(&request) {
            Ok(producer) => {
                debug!(target: targets::CONN, conn = %self.id, %url, "dispatched");
                self.state = State::Start(Response { url, producer });
                Ok(())
            }
            Err(OpenError::Status(status)) => {
                info!(target: targets::CONN, conn = %self.id, %url, %status, "request failed");
                self.state = State::Err { url, status };
                Ok(())
            }
            Err(OpenError::Rejected(reason)) => {
                warn!(target: targets::CONN, conn = %self.id, %url, %reason, "request rejected");
                Err(ConnectionError::Protocol(reason))
            }
        }
    }

    fn write_response(&mut self) -> Result<(), ConnectionError> {
        let mut steps = 0;
        loop {
            if !self.output.is_empty() && !self.output.flush_to(&mut self.transport)? {
                return Ok(());
            }
            let out = self.output.buffer_mut();
            self.state = match mem::replace(&mut self.state, State::Failed) {
                State::Start(response) => {
                    out.extend_from_slice(&Record::start_send_page(response.url.as_str()).encode());
                    State::ProtocolHeaderSent(response)
                }
                State::ProtocolHeaderSent(response) => {
                    if let Some(head) = response.producer.head() {
                        head.write_to(out);
                    }
                    State::HttpHeaderSent(response)
                }
                State::HttpHeaderSent(mut response) => {
                    response.producer.preamble(out);
                    State::BodyStreaming(response)
                }
                State::BodyStreaming(mut response) => {
                    if steps == STEPS_PER_TURN {
                        self.state = State::BodyStreaming(response);
                        return Ok(());
                    }
                    steps += 1;
                    match response.producer.produce(out)? {
                        Progress::Produced => State::BodyStreaming(response),
                        Progress::Finished => State::Content(response),
                        Progress::WouldBlock => {
                            self.state = State::BodyStreaming(response);
                            self.waiting_on_source = true;
                            return Ok(());
                        }
                    }
                }
                State::Content(mut response) => {
                    response.producer.epilogue(out);
                    debug!(target: targets::CONN, conn = %self.id, url = %response.url, "response complete");
                    State::Flushing
                }
                State::Err { url, status } => {
                    out.extend_from_slice(&Record::start_send_page(url.as_str()).encode());
                    out.extend_from_slice(&render::error_response(&status));
                    State::Flushing
                }
                State::Flushing => {
                    self.state = State::Done;
                    return Ok(());
                }
                state @ (State::AwaitingAuth
                | State::AwaitingRequest
                | State::Done
                | State::Failed) => {
                    self.state = state;
                    return Ok(());
                }
            };
        }
    }
}
