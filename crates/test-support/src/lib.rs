//! Shared helpers for the daemon integration tests.
//!
//! Tests build a keys file, talk to a daemon with [`TestClient`] and take the
//! reply apart with [`Reply::parse`].

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use protocol::Record;

/// Key written by [`write_keys_file`] when tests do not care which one.
pub const TEST_KEY: &str = "0123456789abcdef";

/// Writes a `<port> <key>` keys file into `dir` and returns its path.
pub fn write_keys_file(dir: &Path, key: &str) -> io::Result<PathBuf> {
    let path = dir.join("dpid_comm_keys");
    fs::write(&path, format!("5020 {key}\n"))?;
    Ok(path)
}

/// A blocking client for one daemon connection.
#[derive(Debug)]
pub struct TestClient<S> {
    stream: S,
}

impl TestClient<UnixStream> {
    /// Connects to the Unix socket at `path`, retrying while the daemon is
    /// still starting.
    pub fn connect(path: &Path) -> io::Result<Self> {
        let mut last = None;
        for _ in 0..100 {
            match UnixStream::connect(path) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
                    return Ok(Self::new(stream));
                }
                Err(error) => last = Some(error),
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Err(last.unwrap_or_else(|| io::Error::other("daemon never listened")))
    }
}

impl<S: Read + Write> TestClient<S> {
    /// Wraps an already connected stream.
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Sends one record.
    pub fn send(&mut self, record: &Record) -> io::Result<()> {
        self.stream.write_all(&record.encode())
    }

    /// Sends the authentication record for `key`.
    pub fn authenticate(&mut self, key: &str) -> io::Result<()> {
        self.send(&Record::auth(key))
    }

    /// Authenticates, requests `url` and reads until the daemon closes.
    pub fn fetch(mut self, key: &str, url: &str) -> io::Result<Vec<u8>> {
        self.authenticate(key)?;
        self.send(&Record::open_url(url))?;
        self.read_all()
    }

    /// Gives back the stream, for tests that read the reply piecemeal.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Reads until end of stream.
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut reply = Vec::new();
        self.stream.read_to_end(&mut reply)?;
        Ok(reply)
    }
}

/// A reply split into its framing record, HTTP head and body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// The begin-response record as sent.
    pub record: String,
    /// `HTTP/1.1 <code> <reason>`.
    pub status_line: String,
    /// Header lines in order, without line terminators.
    pub headers: Vec<String>,
    /// Everything after the blank line.
    pub body: Vec<u8>,
}

impl Reply {
    /// Splits `bytes`, or returns `None` when they are not a framed response.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let record_end = find(bytes, b" '>")? + 3;
        let record = String::from_utf8(bytes[..record_end].to_vec()).ok()?;
        let rest = &bytes[record_end..];
        let head_end = find(rest, b"\r\n\r\n")?;
        let head = std::str::from_utf8(&rest[..head_end]).ok()?;
        let mut lines = head.split("\r\n");
        let status_line = lines.next()?.to_owned();
        let headers = lines.map(str::to_owned).collect();
        Some(Self {
            record,
            status_line,
            headers,
            body: rest[head_end + 4..].to_vec(),
        })
    }

    /// Numeric status code.
    pub fn status(&self) -> Option<u16> {
        self.status_line.split(' ').nth(1)?.parse().ok()
    }

    /// Value of the first header called `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_file_has_port_and_key() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_keys_file(temp.path(), "abc").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "5020 abc\n");
    }

    #[test]
    fn reply_parts() {
        let bytes = b"<cmd='start_send_page' url='file:/x' '>HTTP/1.1 404 Not Found\r\n\
Content-Type: text/html\r\nContent-Length: 4\r\n\r\nbody";
        let reply = Reply::parse(bytes).unwrap();
        assert_eq!(reply.record, "<cmd='start_send_page' url='file:/x' '>");
        assert_eq!(reply.status(), Some(404));
        assert_eq!(reply.header("content-type"), Some("text/html"));
        assert_eq!(reply.body, b"body");
    }

    #[test]
    fn unframed_bytes_are_not_a_reply() {
        assert_eq!(Reply::parse(b"<cmd='reload_request' '>"), None);
    }

    #[test]
    fn client_writes_encoded_records() {
        let (near, mut far) = UnixStream::pair().unwrap();
        let mut client = TestClient::new(near);
        client.authenticate("k").unwrap();
        drop(client);
        let mut sent = Vec::new();
        far.read_to_end(&mut sent).unwrap();
        assert_eq!(sent, Record::auth("k").encode());
    }
}
