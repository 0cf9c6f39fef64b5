//! Single-threaded event loop for the multiplexed daemons.
//!
//! Every turn registers the listener and each live connection with one
//! `poll(2)` set, waits, then steps only the connections that reported
//! readiness. A connection whose body source has nothing to read yet is
//! registered on the source descriptor instead of the peer, so a slow helper
//! never makes the loop spin.

use std::fmt;
use std::io;
use std::os::fd::AsFd;
use std::time::Duration;

use logging::targets;
use platform::poll::{Interest, PollSet, Readiness};
use platform::signal::ShutdownSignals;
use platform::socket::{Listener, Stream};
use protocol::Authenticator;
use tracing::{debug, info, trace, warn};

use crate::backend::Service;
use crate::connection::{AuthGate, Connection, ConnectionId, Context, Wants};
use crate::error::DaemonError;
use crate::style::ListingStyle;

/// Upper bound on one wait, so shutdown requests are noticed promptly.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the listener and every live connection of one daemon process.
pub struct Reactor {
    listener: Listener,
    service: Box<dyn Service>,
    authenticator: Box<dyn Authenticator>,
    style: ListingStyle,
    connections: Vec<Connection<Stream>>,
    next_id: u64,
    shutdown: bool,
    signals: Option<ShutdownSignals>,
    timeout: Duration,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("scheme", &self.service.scheme())
            .field("style", &self.style)
            .field("connections", &self.connections.len())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl Reactor {
    /// A reactor serving `service` on `listener`.
    pub fn new(
        listener: Listener,
        service: Box<dyn Service>,
        authenticator: Box<dyn Authenticator>,
    ) -> Self {
        Self {
            listener,
            service,
            authenticator,
            style: ListingStyle::default(),
            connections: Vec::new(),
            next_id: 0,
            shutdown: false,
            signals: None,
            timeout: WAIT_TIMEOUT,
        }
    }

    /// Sets the listing style in effect before the first toggle.
    #[must_use]
    pub const fn with_style(mut self, style: ListingStyle) -> Self {
        self.style = style;
        self
    }

    /// Ends the loop when one of `signals` arrives.
    #[must_use]
    pub fn with_signals(mut self, signals: ShutdownSignals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Overrides [`WAIT_TIMEOUT`].
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The listing style new requests will be rendered with.
    pub const fn style(&self) -> ListingStyle {
        self.style
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs until a peer asks the daemon to exit or a termination signal
    /// arrives.
    ///
    /// After a shutdown request no further connections are accepted, idle
    /// ones are dropped and responses already in flight are completed.
    pub fn run(mut self) -> Result<(), DaemonError> {
        info!(target: targets::REACTOR, scheme = self.service.scheme(), "serving");
        loop {
            if let Some(signal) = self.signals.as_ref().and_then(ShutdownSignals::received) {
                info!(target: targets::REACTOR, signal, "terminating on signal");
                return Err(DaemonError::Signal(signal));
            }
            if self.shutdown {
                let before = self.connections.len();
                self.connections.retain(|conn| !conn.is_idle());
                if before != self.connections.len() {
                    debug!(
                        target: targets::REACTOR,
                        dropped = before - self.connections.len(),
                        "dropped idle connections"
                    );
                }
                if self.connections.is_empty() {
                    info!(target: targets::REACTOR, "shutdown requested, exiting");
                    return Ok(());
                }
            }
            self.turn()?;
        }
    }

    /// Waits once and steps every connection that became ready.
    pub fn turn(&mut self) -> Result<(), DaemonError> {
        let (listener_ready, ready) = self.wait()?;

        let mut ctx = Context {
            service: self.service.as_ref(),
            auth: AuthGate::Required(self.authenticator.as_ref()),
            style: &mut self.style,
            shutdown: &mut self.shutdown,
        };
        for (conn, readiness) in self.connections.iter_mut().zip(ready) {
            if !readiness.is_some_and(Readiness::is_any) {
                continue;
            }
            let result = match conn.wants() {
                Wants::Read => conn.on_readable(&mut ctx),
                Wants::Write | Wants::Source => conn.on_writable(),
                Wants::Nothing => Ok(()),
            };
            match result {
                Ok(()) => trace!(target: targets::CONN, conn = %conn.id(), state = conn.state_name(), "stepped"),
                Err(error) => warn!(target: targets::CONN, conn = %conn.id(), %error, "connection failed"),
            }
        }

        self.connections.retain(|conn| {
            let finished = conn.is_finished();
            if finished {
                debug!(target: targets::CONN, conn = %conn.id(), state = conn.state_name(), "closed");
            }
            !finished
        });

        if listener_ready.is_some_and(Readiness::is_any) {
            self.accept_pending();
        }
        Ok(())
    }

    fn wait(&self) -> Result<(Option<Readiness>, Vec<Option<Readiness>>), DaemonError> {
        let mut poll = PollSet::with_capacity(self.connections.len() + 1);
        let listener_token =
            (!self.shutdown).then(|| poll.register(self.listener.as_fd(), Interest::READ));
        let tokens: Vec<Option<usize>> = self
            .connections
            .iter()
            .map(|conn| match conn.wants() {
                Wants::Read => Some(poll.register(conn.transport().as_fd(), Interest::READ)),
                Wants::Write => Some(poll.register(conn.transport().as_fd(), Interest::WRITE)),
                Wants::Source => conn.source_fd().map(|fd| poll.register(fd, Interest::READ)),
                Wants::Nothing => None,
            })
            .collect();

        let ready = poll.wait(Some(self.timeout)).map_err(DaemonError::Reactor)?;
        trace!(target: targets::REACTOR, ready, registered = tokens.len(), "woke");

        let readiness = poll.into_readiness();
        let lookup = |token: usize| readiness.get(token).copied();
        let listener_ready = listener_token.and_then(lookup);
        let ready = tokens
            .into_iter()
            .map(|token| token.and_then(lookup))
            .collect();
        Ok((listener_ready, ready))
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(stream) => {
                    let id = ConnectionId::new(self.next_id);
                    self.next_id += 1;
                    debug!(target: targets::CONN, conn = %id, "accepted");
                    let auth = AuthGate::Required(self.authenticator.as_ref());
                    self.connections.push(Connection::new(id, stream, auth));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) => {}
                Err(error) => {
                    warn!(target: targets::REACTOR, %error, "accept failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stream::StreamProducer;
    use crate::backend::{OpenError, Producer, Request, ResponseHead};
    use crate::status::ErrorStatus;
    use pipeline::{PipelineBuilder, ShellCommand, Stage};
    use platform::socket::ListenAddr;
    use protocol::{Record, SharedKeyAuthenticator};
    use std::io::{Cursor, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::path::Path;

    struct Hello;

    impl Service for Hello {
        fn scheme(&self) -> &'static str {
            "hello"
        }

        fn toggle_url(&self) -> Option<&'static str> {
            Some("dpi:/hello/toggle")
        }

        fn open(&self, request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError> {
            let body = format!("{} {:?}", request.url, request.style);
            Ok(Box::new(StreamProducer::new(
                ResponseHead::new("text/plain"),
                Cursor::new(body.into_bytes()),
            )))
        }
    }

    /// Answers after a delay, from a shell helper read without blocking.
    struct SlowHelper;

    impl Service for SlowHelper {
        fn scheme(&self) -> &'static str {
            "helper"
        }

        fn open(&self, _request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError> {
            let pipeline = PipelineBuilder::new()
                .stage(Stage::shell(ShellCommand::new("sleep 0.3; printf 'from helper'")))
                .spawn()
                .map_err(|error| ErrorStatus::internal(error.to_string()))?;
            pipeline
                .set_nonblocking(true)
                .map_err(|error| ErrorStatus::internal(error.to_string()))?;
            Ok(Box::new(StreamProducer::new(
                ResponseHead::new("text/plain"),
                pipeline,
            )))
        }
    }

    fn reactor_for(socket: &Path, service: Box<dyn Service>) -> Reactor {
        let listener = Listener::bind(&ListenAddr::Unix(socket.to_path_buf())).unwrap();
        Reactor::new(
            listener,
            service,
            Box::new(SharedKeyAuthenticator::new("secret")),
        )
        .with_timeout(Duration::from_millis(200))
    }

    fn reactor(socket: &Path) -> Reactor {
        reactor_for(socket, Box::new(Hello))
    }

    fn send(stream: &mut UnixStream, records: &[Record]) {
        for record in records {
            stream.write_all(&record.encode()).unwrap();
        }
    }

    fn turn_until(reactor: &mut Reactor, mut done: impl FnMut(&Reactor) -> bool) {
        for _ in 0..50 {
            if done(reactor) {
                return;
            }
            reactor.turn().unwrap();
        }
        panic!("reactor made no progress");
    }

    #[test]
    fn serves_interleaved_clients() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("hello.sock");
        let mut reactor = reactor(&socket);

        let mut first = UnixStream::connect(&socket).unwrap();
        let mut second = UnixStream::connect(&socket).unwrap();
        turn_until(&mut reactor, |r| r.connection_count() == 2);

        send(&mut second, &[Record::auth("secret"), Record::open_url("hello:b")]);
        send(&mut first, &[Record::auth("secret"), Record::open_url("hello:a")]);
        turn_until(&mut reactor, |r| r.connection_count() == 0);

        let mut reply = String::new();
        first.read_to_string(&mut reply).unwrap();
        assert!(reply.starts_with("<cmd='start_send_page' url='hello:a' '>HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("hello:a Table"));

        reply.clear();
        second.read_to_string(&mut reply).unwrap();
        assert!(reply.ends_with("hello:b Table"));
    }

    #[test]
    fn waits_on_a_slow_helper_while_serving_others() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("helper.sock");
        let mut reactor = reactor_for(&socket, Box::new(SlowHelper));

        let mut slow = UnixStream::connect(&socket).unwrap();
        send(&mut slow, &[Record::auth("secret"), Record::open_url("helper:x")]);
        turn_until(&mut reactor, |r| r.connection_count() == 1);

        let mut other = UnixStream::connect(&socket).unwrap();
        send(&mut other, &[Record::auth("secret"), Record::open_url("helper:y")]);
        turn_until(&mut reactor, |r| r.connection_count() == 0);

        for (stream, url) in [(&mut slow, "helper:x"), (&mut other, "helper:y")] {
            let mut reply = String::new();
            stream.read_to_string(&mut reply).unwrap();
            assert_eq!(
                reply,
                format!(
                    "<cmd='start_send_page' url='{url}' '>HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\r\nfrom helper"
                )
            );
        }
    }

    #[test]
    fn toggle_changes_later_requests() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("hello.sock");
        let mut reactor = reactor(&socket);

        let mut toggler = UnixStream::connect(&socket).unwrap();
        send(
            &mut toggler,
            &[Record::auth("secret"), Record::open_url("dpi:/hello/toggle")],
        );
        turn_until(&mut reactor, |r| r.style() == ListingStyle::Plain);
        turn_until(&mut reactor, |r| r.connection_count() == 0);
        let mut reply = String::new();
        toggler.read_to_string(&mut reply).unwrap();
        assert_eq!(reply, "<cmd='reload_request' '>");

        let mut client = UnixStream::connect(&socket).unwrap();
        send(&mut client, &[Record::auth("secret"), Record::open_url("hello:c")]);
        turn_until(&mut reactor, |r| r.connection_count() == 1);
        turn_until(&mut reactor, |r| r.connection_count() == 0);
        reply.clear();
        client.read_to_string(&mut reply).unwrap();
        assert!(reply.ends_with("hello:c Plain"));
    }

    #[test]
    fn failed_authentication_closes_only_that_connection() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("hello.sock");
        let mut reactor = reactor(&socket);

        let mut intruder = UnixStream::connect(&socket).unwrap();
        let _idle = UnixStream::connect(&socket).unwrap();
        turn_until(&mut reactor, |r| r.connection_count() == 2);
        send(&mut intruder, &[Record::auth("guess")]);
        turn_until(&mut reactor, |r| r.connection_count() == 1);

        let mut reply = Vec::new();
        intruder.read_to_end(&mut reply).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn bye_drops_idle_connections_and_returns() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("hello.sock");
        let reactor = reactor(&socket);

        let mut idle = UnixStream::connect(&socket).unwrap();
        let mut closer = UnixStream::connect(&socket).unwrap();
        send(&mut closer, &[Record::auth("secret"), Record::bye()]);

        reactor.run().unwrap();
        let mut rest = Vec::new();
        idle.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }
}
