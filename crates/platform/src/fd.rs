//! Descriptor flag manipulation.

#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};

/// Switches `O_NONBLOCK` on or off for `fd`.
///
/// Sockets already offer `set_nonblocking`; this exists for pipes obtained
/// from child processes, which the standard library leaves blocking.
pub fn set_nonblocking(fd: BorrowedFd<'_>, nonblocking: bool) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` comes from a live `BorrowedFd`, F_GETFL takes no pointer arguments.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let updated = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if updated != flags {
        // SAFETY: as above, F_SETFL takes an integer flag word.
        let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, updated) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Reports whether `O_NONBLOCK` is set on `fd`.
pub fn is_nonblocking(fd: BorrowedFd<'_>) -> io::Result<bool> {
    // SAFETY: see `set_nonblocking`.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags & libc::O_NONBLOCK != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn toggles_nonblocking_flag() {
        let (left, _right) = UnixStream::pair().unwrap();
        assert!(!is_nonblocking(left.as_fd()).unwrap());
        set_nonblocking(left.as_fd(), true).unwrap();
        assert!(is_nonblocking(left.as_fd()).unwrap());
        set_nonblocking(left.as_fd(), false).unwrap();
        assert!(!is_nonblocking(left.as_fd()).unwrap());
    }

    #[test]
    fn setting_same_state_twice_is_harmless() {
        let (left, _right) = UnixStream::pair().unwrap();
        set_nonblocking(left.as_fd(), true).unwrap();
        set_nonblocking(left.as_fd(), true).unwrap();
        assert!(is_nonblocking(left.as_fd()).unwrap());
    }
}
