use std::env;

use crate::Verbosity;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "DPI_LOG";

/// Logging settings for one daemon process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogConfig {
    verbosity: Verbosity,
    directives: Option<String>,
    ansi: bool,
}

impl LogConfig {
    /// Configuration with the given verbosity and no directives.
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            directives: None,
            ansi: false,
        }
    }

    /// Reads directives from [`LOG_ENV`] when set and non-empty.
    #[must_use]
    pub fn from_env(verbosity: Verbosity) -> Self {
        let directives = env::var(LOG_ENV).ok().filter(|value| !value.trim().is_empty());
        Self::new(verbosity).with_directives(directives)
    }

    /// Replaces the filter directives.
    #[must_use]
    pub fn with_directives(mut self, directives: Option<String>) -> Self {
        self.directives = directives;
        self
    }

    /// Enables or disables ANSI colours in the output.
    #[must_use]
    pub const fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// The configured verbosity.
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Filter directives overriding the verbosity, if any.
    #[must_use]
    pub fn directives(&self) -> Option<&str> {
        self.directives.as_deref()
    }

    /// Whether ANSI colours are enabled.
    #[must_use]
    pub const fn ansi(&self) -> bool {
        self.ansi
    }
}
