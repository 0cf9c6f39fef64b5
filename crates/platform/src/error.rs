use std::io;

/// Errors raised while preparing listening endpoints.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The listen address was neither `unix:<path>` nor `<host>:<port>`.
    #[error("invalid listen address '{0}': expected unix:<path> or <host>:<port>")]
    InvalidListenAddress(String),
    /// Standard input does not carry a listening stream socket.
    #[error("standard input is not a listening socket")]
    NotAListener,
    /// Underlying system call failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}
