//! Daemon configuration builders.
//!
//! [`DaemonConfig`] is the immutable result of combining command-line options
//! with the environment. [`DaemonConfigBuilder`] assembles it; lookups of
//! `DPI_KEYS_FILE` and `HOME` are injected so tests never touch the process
//! environment.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use listing::ArchiverKind;
use logging::Verbosity;
use platform::socket::ListenAddr;
use protocol::default_keys_path;

use crate::dls::DEFAULT_SCRIPT_DIR;
use crate::error::DaemonError;
use crate::kind::DaemonKind;
use crate::style::ListingStyle;

/// Environment variable naming the keys file.
pub const KEYS_FILE_ENV: &str = "DPI_KEYS_FILE";

/// What the download mode of the gopher relay should fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Download {
    /// Url to fetch.
    pub url: String,
    /// File the reply is written to.
    pub output: PathBuf,
}

/// Configuration of one daemon process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaemonConfig {
    kind: DaemonKind,
    listen: Option<ListenAddr>,
    keys_file: Option<PathBuf>,
    archiver: ArchiverKind,
    script_dir: PathBuf,
    style: ListingStyle,
    verbosity: Verbosity,
    download: Option<Download>,
}

impl DaemonConfig {
    /// Creates a new [`DaemonConfigBuilder`] for `kind`.
    #[must_use]
    pub fn builder(kind: DaemonKind) -> DaemonConfigBuilder {
        DaemonConfigBuilder::new(kind)
    }

    /// The daemon being configured.
    #[must_use]
    pub const fn kind(&self) -> DaemonKind {
        self.kind
    }

    /// Explicit listening endpoint. `None` means the socket on stdin.
    #[must_use]
    pub const fn listen(&self) -> Option<&ListenAddr> {
        self.listen.as_ref()
    }

    /// Keys file location, if one could be determined.
    #[must_use]
    pub fn keys_file(&self) -> Option<&Path> {
        self.keys_file.as_deref()
    }

    /// Keys file location, or [`DaemonError::NoKeysFile`].
    pub fn require_keys_file(&self) -> Result<&Path, DaemonError> {
        self.keys_file().ok_or(DaemonError::NoKeysFile)
    }

    /// Archive helper used by the archive daemon.
    #[must_use]
    pub const fn archiver(&self) -> ArchiverKind {
        self.archiver
    }

    /// Directory searched for local scripts.
    #[must_use]
    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Listing style before the first toggle.
    #[must_use]
    pub const fn style(&self) -> ListingStyle {
        self.style
    }

    /// Diagnostic level.
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Download request, when the relay runs without the record protocol.
    #[must_use]
    pub const fn download(&self) -> Option<&Download> {
        self.download.as_ref()
    }
}

/// Builder used to assemble a [`DaemonConfig`].
#[derive(Clone, Debug)]
pub struct DaemonConfigBuilder {
    kind: DaemonKind,
    listen: Option<String>,
    keys_file: Option<PathBuf>,
    keys_env: Option<OsString>,
    home: Option<PathBuf>,
    archiver: Option<String>,
    script_dir: Option<PathBuf>,
    style: ListingStyle,
    verbosity: Verbosity,
    download: Option<Download>,
}

impl DaemonConfigBuilder {
    fn new(kind: DaemonKind) -> Self {
        Self {
            kind,
            listen: None,
            keys_file: None,
            keys_env: None,
            home: None,
            archiver: None,
            script_dir: None,
            style: ListingStyle::default(),
            verbosity: Verbosity::default(),
            download: None,
        }
    }

    /// Reads `DPI_KEYS_FILE` and `HOME` from the process environment.
    #[must_use]
    pub fn from_process_env(self) -> Self {
        self.keys_env(env::var_os(KEYS_FILE_ENV))
            .home(env::var_os("HOME").map(PathBuf::from))
    }

    /// Sets the endpoint given by `--listen`.
    #[must_use]
    pub fn listen(mut self, listen: Option<String>) -> Self {
        self.listen = listen;
        self
    }

    /// Sets the keys file given by `--keys-file`.
    #[must_use]
    pub fn keys_file(mut self, path: Option<PathBuf>) -> Self {
        self.keys_file = path;
        self
    }

    /// Value of `DPI_KEYS_FILE`, used when no keys file was given.
    #[must_use]
    pub fn keys_env(mut self, value: Option<OsString>) -> Self {
        self.keys_env = value.filter(|value| !value.is_empty());
        self
    }

    /// Home directory, the last resort for locating the keys file.
    #[must_use]
    pub fn home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home.filter(|home| !home.as_os_str().is_empty());
        self
    }

    /// Sets the helper named by `--archiver`.
    #[must_use]
    pub fn archiver(mut self, archiver: Option<String>) -> Self {
        self.archiver = archiver;
        self
    }

    /// Sets the directory given by `--script-dir`.
    #[must_use]
    pub fn script_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.script_dir = dir;
        self
    }

    /// Starts in the plain listing style.
    #[must_use]
    pub const fn old_style(mut self, old_style: bool) -> Self {
        self.style = if old_style {
            ListingStyle::Plain
        } else {
            ListingStyle::Table
        };
        self
    }

    /// Sets the diagnostic level.
    #[must_use]
    pub const fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Requests download mode.
    #[must_use]
    pub fn download(mut self, download: Option<Download>) -> Self {
        self.download = download;
        self
    }

    /// Validates the options and constructs the [`DaemonConfig`].
    pub fn build(self) -> Result<DaemonConfig, DaemonError> {
        let listen = self
            .listen
            .map(|text| {
                text.parse::<ListenAddr>()
                    .map_err(|source| DaemonError::Listen {
                        endpoint: text.clone(),
                        source,
                    })
            })
            .transpose()?;
        let archiver = self
            .archiver
            .map(|name| name.parse::<ArchiverKind>().map_err(DaemonError::Config))
            .transpose()?
            .unwrap_or_default();
        let keys_file = self
            .keys_file
            .or_else(|| self.keys_env.map(PathBuf::from))
            .or_else(|| self.home.as_deref().map(default_keys_path));

        Ok(DaemonConfig {
            kind: self.kind,
            listen,
            keys_file,
            archiver,
            script_dir: self
                .script_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPT_DIR)),
            style: self.style,
            verbosity: self.verbosity,
            download: self.download,
        })
    }
}
