//! Shared-key authentication of new connections.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::record::{Record, command};

/// Decides whether the first record of a connection may proceed.
pub trait Authenticator {
    /// Returns `true` when `record` carries valid credentials.
    fn check(&self, record: &Record) -> bool;
}

impl<A: Authenticator + ?Sized> Authenticator for &A {
    fn check(&self, record: &Record) -> bool {
        (**self).check(record)
    }
}

impl<A: Authenticator + ?Sized> Authenticator for Box<A> {
    fn check(&self, record: &Record) -> bool {
        (**self).check(record)
    }
}

/// Errors raised while loading the keys file.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The keys file could not be read.
    #[error("failed to read keys file {path}: {source}")]
    Read {
        /// Path of the keys file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The keys file does not contain `<port> <key>`.
    #[error("keys file {path} is malformed")]
    Malformed {
        /// Path of the keys file.
        path: PathBuf,
    },
}

/// Location of the keys file below `home`.
pub fn default_keys_path(home: &Path) -> PathBuf {
    home.join(".dillo").join("dpid_comm_keys")
}

/// Accepts `<cmd='auth' msg='KEY' '>` records carrying the shared key.
pub struct SharedKeyAuthenticator {
    key: Zeroizing<String>,
}

impl SharedKeyAuthenticator {
    /// Uses `key` directly.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Zeroizing::new(key.into()),
        }
    }

    /// Loads the key from a `<port> <key>` keys file.
    pub fn from_keys_file(path: &Path) -> Result<Self, AuthError> {
        let contents = Zeroizing::new(fs::read_to_string(path).map_err(|source| AuthError::Read {
            path: path.to_path_buf(),
            source,
        })?);
        Self::parse_keys(&contents).ok_or_else(|| AuthError::Malformed {
            path: path.to_path_buf(),
        })
    }

    /// Extracts the key from keys-file contents.
    pub fn parse_keys(contents: &str) -> Option<Self> {
        let mut fields = contents.split_ascii_whitespace();
        fields.next()?.parse::<u16>().ok()?;
        let key = fields.next()?;
        Some(Self::new(key))
    }
}

impl std::fmt::Debug for SharedKeyAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyAuthenticator")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Authenticator for SharedKeyAuthenticator {
    fn check(&self, record: &Record) -> bool {
        record.command() == Some(command::AUTH)
            && record
                .get("msg")
                .is_some_and(|offered| constant_time_eq(offered.as_bytes(), self.key.as_bytes()))
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
