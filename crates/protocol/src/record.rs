//! Tagged record framing.
//!
//! A record looks like `<cmd='start_send_page' url='file:/tmp' '>`: a `<`,
//! any number of `key='value'` attributes each followed by a space, and the
//! terminator `'>`. A single quote inside a value is written twice.

use std::fmt;

use memchr::memchr;

/// Upper bound on the size of one encoded record.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Command names understood by the daemons.
pub mod command {
    /// Authentication record carrying the shared key in `msg`.
    pub const AUTH: &str = "auth";
    /// Resource request carrying `url`.
    pub const OPEN_URL: &str = "open_url";
    /// Asks the daemon process to exit.
    pub const BYE: &str = "DpiBye";
    /// Announces that a raw HTTP response for `url` follows.
    pub const START_SEND_PAGE: &str = "start_send_page";
    /// Asks the browser to issue its last request again.
    pub const RELOAD_REQUEST: &str = "reload_request";
}

/// Errors produced while decoding records.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// A byte that cannot appear at this point of a record.
    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte {
        /// Offset from the start of the record.
        offset: usize,
        /// The offending byte.
        byte: u8,
    },
    /// An unfinished record grew past [`MAX_RECORD_LEN`].
    #[error("record exceeds {limit} bytes")]
    TooLarge {
        /// The configured limit.
        limit: usize,
    },
    /// An attribute value is not valid UTF-8.
    #[error("attribute '{key}' is not valid UTF-8")]
    InvalidUtf8 {
        /// Attribute name.
        key: String,
    },
    /// Input ended before the record terminator.
    #[error("record is truncated")]
    Truncated,
}

/// One protocol message: an ordered list of attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    attributes: Vec<(String, String)>,
}

impl Record {
    /// Starts a record whose `cmd` attribute is `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            attributes: vec![("cmd".to_owned(), command.into())],
        }
    }

    /// Appends an attribute.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// `<cmd='auth' msg='KEY' '>`
    pub fn auth(key: impl Into<String>) -> Self {
        Self::new(command::AUTH).with("msg", key)
    }

    /// `<cmd='open_url' url='URL' '>`
    pub fn open_url(url: impl Into<String>) -> Self {
        Self::new(command::OPEN_URL).with("url", url)
    }

    /// `<cmd='start_send_page' url='URL' '>`
    pub fn start_send_page(url: impl Into<String>) -> Self {
        Self::new(command::START_SEND_PAGE).with("url", url)
    }

    /// `<cmd='reload_request' '>`
    pub fn reload_request() -> Self {
        Self::new(command::RELOAD_REQUEST)
    }

    /// `<cmd='DpiBye' '>`
    pub fn bye() -> Self {
        Self::new(command::BYE)
    }

    /// Value of the first attribute named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Shorthand for `get("cmd")`.
    pub fn command(&self) -> Option<&str> {
        self.get("cmd")
    }

    /// Iterates over attributes in wire order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Serialises the record.
    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self
            .attributes
            .iter()
            .map(|(key, value)| key.len() + value.len() + 4)
            .sum();
        let mut out = Vec::with_capacity(payload + 3);
        out.push(b'<');
        for (key, value) in &self.attributes {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b"='");
            for &byte in value.as_bytes() {
                if byte == b'\'' {
                    out.push(b'\'');
                }
                out.push(byte);
            }
            out.extend_from_slice(b"' ");
        }
        out.extend_from_slice(b"'>");
        out
    }

    /// Decodes exactly one complete record from `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        let start = bytes
            .iter()
            .position(|byte| !byte.is_ascii_whitespace())
            .ok_or(RecordError::Truncated)?;
        match parse_record(&bytes[start..])? {
            Parsed::Complete(record, _) => Ok(record),
            Parsed::Incomplete => Err(RecordError::Truncated),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.encode()))
    }
}

enum Parsed {
    Complete(Record, usize),
    Incomplete,
}

fn is_key_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

fn parse_record(input: &[u8]) -> Result<Parsed, RecordError> {
    match input.first() {
        None => return Ok(Parsed::Incomplete),
        Some(b'<') => {}
        Some(&byte) => return Err(RecordError::UnexpectedByte { offset: 0, byte }),
    }

    let mut record = Record::default();
    let mut pos = 1;
    loop {
        while input.get(pos) == Some(&b' ') {
            pos += 1;
        }
        let Some(&byte) = input.get(pos) else {
            return Ok(Parsed::Incomplete);
        };

        if byte == b'\'' {
            return match input.get(pos + 1) {
                None => Ok(Parsed::Incomplete),
                Some(b'>') => Ok(Parsed::Complete(record, pos + 2)),
                Some(&other) => Err(RecordError::UnexpectedByte {
                    offset: pos + 1,
                    byte: other,
                }),
            };
        }

        let key_start = pos;
        while input.get(pos).is_some_and(|&b| is_key_byte(b)) {
            pos += 1;
        }
        let Some(&delimiter) = input.get(pos) else {
            return Ok(Parsed::Incomplete);
        };
        if pos == key_start || delimiter != b'=' {
            return Err(RecordError::UnexpectedByte {
                offset: pos,
                byte: delimiter,
            });
        }
        // Key bytes were restricted to ASCII above.
        let key = String::from_utf8_lossy(&input[key_start..pos]).into_owned();
        pos += 1;
        match input.get(pos) {
            None => return Ok(Parsed::Incomplete),
            Some(b'\'') => pos += 1,
            Some(&other) => {
                return Err(RecordError::UnexpectedByte {
                    offset: pos,
                    byte: other,
                });
            }
        }

        let mut value = Vec::new();
        loop {
            let Some(quote) = memchr(b'\'', &input[pos..]).map(|found| pos + found) else {
                return Ok(Parsed::Incomplete);
            };
            match input.get(quote + 1) {
                None => return Ok(Parsed::Incomplete),
                Some(b'\'') => {
                    value.extend_from_slice(&input[pos..=quote]);
                    pos = quote + 2;
                }
                Some(_) => {
                    value.extend_from_slice(&input[pos..quote]);
                    pos = quote + 1;
                    break;
                }
            }
        }
        match input.get(pos) {
            None => return Ok(Parsed::Incomplete),
            Some(b' ') => {}
            Some(&other) => {
                return Err(RecordError::UnexpectedByte {
                    offset: pos,
                    byte: other,
                });
            }
        }

        let value = String::from_utf8(value)
            .map_err(|_| RecordError::InvalidUtf8 { key: key.clone() })?;
        record.attributes.push((key, value));
    }
}

/// Incremental record decoder for non-blocking transports.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
}

impl RecordDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet returned as a record.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete record, `Ok(None)` if more input is needed.
    ///
    /// Whitespace between records is skipped. After an error the decoder
    /// state is unspecified and the connection should be dropped.
    pub fn next_record(&mut self) -> Result<Option<Record>, RecordError> {
        match self.buffer.iter().position(|byte| !byte.is_ascii_whitespace()) {
            None => {
                self.buffer.clear();
                return Ok(None);
            }
            Some(start) => {
                self.buffer.drain(..start);
            }
        }
        match parse_record(&self.buffer)? {
            Parsed::Complete(record, used) => {
                self.buffer.drain(..used);
                Ok(Some(record))
            }
            Parsed::Incomplete if self.buffer.len() > MAX_RECORD_LEN => Err(RecordError::TooLarge {
                limit: MAX_RECORD_LEN,
            }),
            Parsed::Incomplete => Ok(None),
        }
    }
}
