//! Listening endpoints and accepted streams.
//!
//! A daemon listens either on a Unix-domain socket, a TCP address, or a
//! socket inherited on standard input from its launcher. [`Listener`] hides
//! the difference and always yields non-blocking [`Stream`]s.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::str::FromStr;

use socket2::{Domain, Socket};

use crate::PlatformError;

/// Where a daemon should listen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenAddr {
    /// A Unix-domain socket path.
    Unix(PathBuf),
    /// A TCP socket address.
    Tcp(SocketAddr),
}

impl FromStr for ListenAddr {
    type Err = PlatformError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some(path) = text.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(PlatformError::InvalidListenAddress(text.to_owned()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        text.to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(Self::Tcp)
            .ok_or_else(|| PlatformError::InvalidListenAddress(text.to_owned()))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// A non-blocking listening socket.
#[derive(Debug)]
pub enum Listener {
    /// Unix-domain listener.
    Unix(UnixListener),
    /// TCP listener.
    Tcp(TcpListener),
}

impl Listener {
    /// Binds a fresh listener at `addr`.
    ///
    /// A stale Unix socket left at the path by a previous run is removed
    /// first; any other kind of file at that path is left alone and the bind
    /// fails.
    pub fn bind(addr: &ListenAddr) -> Result<Self, PlatformError> {
        let listener = match addr {
            ListenAddr::Unix(path) => {
                if let Ok(meta) = fs::symlink_metadata(path) {
                    if meta.file_type().is_socket() {
                        fs::remove_file(path)?;
                    }
                }
                Self::Unix(UnixListener::bind(path)?)
            }
            ListenAddr::Tcp(addr) => Self::Tcp(TcpListener::bind(addr)?),
        };
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    /// Adopts the listening socket a launcher placed on standard input.
    pub fn inherit_stdin() -> Result<Self, PlatformError> {
        let owned: OwnedFd = io::stdin().as_fd().try_clone_to_owned()?;
        Self::from_owned_fd(owned)
    }

    /// Adopts an already listening socket descriptor.
    pub fn from_owned_fd(fd: OwnedFd) -> Result<Self, PlatformError> {
        let socket = Socket::from(fd);
        let local = socket.local_addr().map_err(|_| PlatformError::NotAListener)?;
        #[cfg(target_os = "linux")]
        if !socket.is_listener().unwrap_or(false) {
            return Err(PlatformError::NotAListener);
        }
        let owned = OwnedFd::from(socket);
        let listener = if local.domain() == Domain::UNIX {
            Self::Unix(UnixListener::from(owned))
        } else if local.as_socket().is_some() {
            Self::Tcp(TcpListener::from(owned))
        } else {
            return Err(PlatformError::NotAListener);
        };
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Unix(listener) => listener.set_nonblocking(nonblocking),
            Self::Tcp(listener) => listener.set_nonblocking(nonblocking),
        }
    }

    /// Accepts one pending connection and makes it non-blocking.
    pub fn accept(&self) -> io::Result<Stream> {
        let stream = match self {
            Self::Unix(listener) => Stream::Unix(listener.accept()?.0),
            Self::Tcp(listener) => Stream::Tcp(listener.accept()?.0),
        };
        stream.set_nonblocking(true)?;
        Ok(stream)
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Unix(listener) => listener.as_fd(),
            Self::Tcp(listener) => listener.as_fd(),
        }
    }
}

/// An accepted client connection.
#[derive(Debug)]
pub enum Stream {
    /// Unix-domain stream.
    Unix(UnixStream),
    /// TCP stream.
    Tcp(TcpStream),
}

impl Stream {
    /// Switches the stream between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Unix(stream) => stream.set_nonblocking(nonblocking),
            Self::Tcp(stream) => stream.set_nonblocking(nonblocking),
        }
    }
}

impl From<UnixStream> for Stream {
    fn from(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Unix(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Unix(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Unix(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}

impl AsFd for Stream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Unix(stream) => stream.as_fd(),
            Self::Tcp(stream) => stream.as_fd(),
        }
    }
}
