//! Pending output that survives partial writes.

use std::io::{self, Write};

/// Bytes queued for the peer.
///
/// Producers append to [`buffer_mut`](Self::buffer_mut); the connection
/// drains the queue whenever the transport is writable. A short write keeps
/// the unsent tail for the next opportunity.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    sent: usize,
}

impl OutputBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when nothing is waiting to be sent.
    pub fn is_empty(&self) -> bool {
        self.sent == self.bytes.len()
    }

    /// Number of bytes still waiting.
    pub fn pending(&self) -> usize {
        self.bytes.len() - self.sent
    }

    /// Appends `bytes` to the queue.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer_mut().extend_from_slice(bytes);
    }

    /// The queue's backing vector, with already-sent bytes discarded.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        if self.sent > 0 {
            self.bytes.drain(..self.sent);
            self.sent = 0;
        }
        &mut self.bytes
    }

    /// Writes as much as `writer` accepts.
    ///
    /// Returns `Ok(true)` once the queue is empty and `Ok(false)` when the
    /// writer would block.
    pub fn flush_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<bool> {
        while self.sent < self.bytes.len() {
            match writer.write(&self.bytes[self.sent..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(written) => self.sent += written,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(error) => return Err(error),
            }
        }
        self.bytes.clear();
        self.sent = 0;
        writer.flush()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `budget` bytes per call, then blocks once.
    struct Trickle {
        written: Vec<u8>,
        budget: usize,
        block_next: bool,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.block_next {
                self.block_next = false;
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            self.block_next = true;
            let take = buf.len().min(self.budget);
            self.written.extend_from_slice(&buf[..take]);
            Ok(take)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_writes_resume_where_they_stopped() {
        let mut output = OutputBuffer::new();
        output.extend(b"hello world");
        let mut sink = Trickle {
            written: Vec::new(),
            budget: 4,
            block_next: false,
        };

        assert!(!output.flush_to(&mut sink).unwrap());
        assert_eq!(output.pending(), 7);
        output.extend(b"!");
        while !output.flush_to(&mut sink).unwrap() {}
        assert_eq!(sink.written, b"hello world!");
        assert!(output.is_empty());
    }

    #[test]
    fn zero_length_write_is_an_error() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut output = OutputBuffer::new();
        output.extend(b"x");
        let error = output.flush_to(&mut Closed).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn empty_buffer_flushes_immediately() {
        let mut output = OutputBuffer::new();
        assert!(output.flush_to(&mut Vec::new()).unwrap());
    }
}
