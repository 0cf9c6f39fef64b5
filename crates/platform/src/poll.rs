//! Readiness multiplexing over `poll(2)`.
//!
//! A [`PollSet`] is built fresh for every reactor turn: descriptors are
//! registered with an [`Interest`], [`PollSet::wait`] blocks until at least one
//! is ready or the timeout elapses, and [`PollSet::into_readiness`] releases
//! the borrows in exchange for one [`Readiness`] per registration, indexed by
//! the token returned from [`PollSet::register`].

#![allow(unsafe_code)]

use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

/// Which readiness conditions a registration waits for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    readable: bool,
    writable: bool,
}

impl Interest {
    /// Wait for the descriptor to become readable.
    pub const READ: Self = Self {
        readable: true,
        writable: false,
    };
    /// Wait for the descriptor to become writable.
    pub const WRITE: Self = Self {
        readable: false,
        writable: true,
    };
    /// Wait for either condition.
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };

    /// Returns `true` when read readiness is requested.
    pub const fn is_readable(self) -> bool {
        self.readable
    }

    /// Returns `true` when write readiness is requested.
    pub const fn is_writable(self) -> bool {
        self.writable
    }

    fn events(self) -> libc::c_short {
        let mut events = 0;
        if self.readable {
            events |= libc::POLLIN;
        }
        if self.writable {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Conditions reported for one registration after a wait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Data (or end-of-file) can be read without blocking.
    pub readable: bool,
    /// Some output can be written without blocking.
    pub writable: bool,
    /// The peer hung up.
    pub hangup: bool,
    /// The descriptor is in an error state or invalid.
    pub error: bool,
}

impl Readiness {
    fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & libc::POLLIN != 0,
            writable: revents & libc::POLLOUT != 0,
            hangup: revents & libc::POLLHUP != 0,
            error: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
        }
    }

    /// Returns `true` when any condition was reported.
    pub const fn is_any(self) -> bool {
        self.readable || self.writable || self.hangup || self.error
    }
}

/// Descriptor set for a single `poll(2)` call.
#[derive(Default)]
pub struct PollSet<'fd> {
    fds: Vec<libc::pollfd>,
    _borrow: PhantomData<BorrowedFd<'fd>>,
}

impl fmt::Debug for PollSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fds.iter().map(|slot| (slot.fd, slot.events, slot.revents)))
            .finish()
    }
}

impl<'fd> PollSet<'fd> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set with room for `capacity` registrations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            _borrow: PhantomData,
        }
    }

    /// Adds `fd` to the set and returns its token.
    pub fn register(&mut self, fd: BorrowedFd<'fd>, interest: Interest) -> usize {
        self.fds.push(libc::pollfd {
            fd: fd.as_raw_fd(),
            events: interest.events(),
            revents: 0,
        });
        self.fds.len() - 1
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Blocks until a registration is ready or `timeout` elapses.
    ///
    /// Returns the number of ready registrations. An interrupted wait returns
    /// `Ok(0)` so the caller can re-examine its shutdown flags.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout.map_or(-1, |limit| {
            libc::c_int::try_from(limit.as_millis()).unwrap_or(libc::c_int::MAX)
        });
        for slot in &mut self.fds {
            slot.revents = 0;
        }
        // SAFETY: `fds` is an exclusively borrowed, initialised slice of
        // `pollfd` whose length is passed alongside the pointer. Every
        // descriptor is kept open by the `'fd` borrow.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }

    /// Readiness reported for `token` by the last wait.
    pub fn readiness(&self, token: usize) -> Readiness {
        self.fds
            .get(token)
            .map_or_else(Readiness::default, |slot| Readiness::from_revents(slot.revents))
    }

    /// Consumes the set, returning the readiness of every registration in
    /// token order.
    pub fn into_readiness(self) -> Vec<Readiness> {
        self.fds
            .iter()
            .map(|slot| Readiness::from_revents(slot.revents))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readable_after_peer_writes() {
        let (left, mut right) = UnixStream::pair().unwrap();
        right.write_all(b"x").unwrap();

        let mut set = PollSet::new();
        let token = set.register(left.as_fd(), Interest::READ);
        let ready = set.wait(Some(Duration::from_secs(1))).unwrap();

        assert_eq!(ready, 1);
        assert!(set.readiness(token).readable);
    }

    #[test]
    fn times_out_when_nothing_is_ready() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut set = PollSet::new();
        let token = set.register(left.as_fd(), Interest::READ);

        let ready = set.wait(Some(Duration::from_millis(10))).unwrap();

        assert_eq!(ready, 0);
        assert!(!set.readiness(token).is_any());
    }

    #[test]
    fn fresh_socket_is_writable() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut set = PollSet::with_capacity(1);
        set.register(left.as_fd(), Interest::WRITE);
        set.wait(Some(Duration::from_secs(1))).unwrap();

        let readiness = set.into_readiness();
        assert_eq!(readiness.len(), 1);
        assert!(readiness[0].writable);
        assert!(!readiness[0].readable);
    }

    #[test]
    fn peer_close_is_visible() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);
        let mut set = PollSet::new();
        let token = set.register(left.as_fd(), Interest::READ);
        set.wait(Some(Duration::from_secs(1))).unwrap();

        let readiness = set.readiness(token);
        assert!(readiness.readable || readiness.hangup);
    }

    #[test]
    fn unknown_token_has_no_readiness() {
        let set = PollSet::new();
        assert!(set.is_empty());
        assert_eq!(set.readiness(3), Readiness::default());
    }
}
