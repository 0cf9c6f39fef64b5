//! Byte-stream bodies: files, helper pipelines and sockets.

use std::fs::File;
use std::io::{self, Read};
use std::net::TcpStream;
use std::os::fd::{AsFd, BorrowedFd};

use pipeline::Pipeline;

use super::{CHUNK_LEN, Producer, Progress, ResponseHead};

/// A readable body source.
pub trait Source: Read {
    /// Descriptor that becomes readable when more data arrives. Sources that
    /// never block return `None`.
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

impl Source for File {}

impl Source for Pipeline {
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        self.source_fd()
    }
}

impl Source for TcpStream {
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.as_fd())
    }
}

impl<T: AsRef<[u8]>> Source for io::Cursor<T> {}

/// Relays a [`Source`] in fixed-size chunks.
#[derive(Debug)]
pub struct StreamProducer<S> {
    head: Option<ResponseHead>,
    source: S,
    chunk_len: usize,
}

impl<S: Source> StreamProducer<S> {
    /// Relays `source` after `head`, in [`CHUNK_LEN`] pieces.
    pub fn new(head: ResponseHead, source: S) -> Self {
        Self {
            head: Some(head),
            source,
            chunk_len: CHUNK_LEN,
        }
    }

    /// Relays `source` verbatim; the source writes its own HTTP head.
    pub fn raw(source: S) -> Self {
        Self {
            head: None,
            source,
            chunk_len: CHUNK_LEN,
        }
    }

    /// Uses chunks of `chunk_len` bytes instead of [`CHUNK_LEN`].
    #[must_use]
    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.max(1);
        self
    }
}

/// Reads at most `len` bytes from `source` onto the end of `out`.
pub(crate) fn read_chunk<R: Read + ?Sized>(
    source: &mut R,
    out: &mut Vec<u8>,
    len: usize,
) -> io::Result<Progress> {
    let start = out.len();
    out.resize(start + len, 0);
    let result = loop {
        match source.read(&mut out[start..]) {
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            other => break other,
        }
    };
    match result {
        Ok(0) => {
            out.truncate(start);
            Ok(Progress::Finished)
        }
        Ok(read) => {
            out.truncate(start + read);
            Ok(Progress::Produced)
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
            out.truncate(start);
            Ok(Progress::WouldBlock)
        }
        Err(error) => {
            out.truncate(start);
            Err(error)
        }
    }
}

impl<S: Source> Producer for StreamProducer<S> {
    fn head(&self) -> Option<ResponseHead> {
        self.head.clone()
    }

    fn produce(&mut self, out: &mut Vec<u8>) -> io::Result<Progress> {
        read_chunk(&mut self.source, out, self.chunk_len)
    }

    fn source_fd(&self) -> Option<BorrowedFd<'_>> {
        self.source.readiness_fd()
    }
}
