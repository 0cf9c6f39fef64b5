//! The five daemons built from this crate.

use std::fmt;

use crate::backend::archive::ZIP_SCHEME;
use crate::backend::file::FILE_SCHEME;
use crate::backend::man::MAN_SCHEME;
use crate::dls::DLS_SCHEME;
use crate::gopher::GOPHER_SCHEME;

/// Which daemon a binary runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DaemonKind {
    /// Directory and file server.
    File,
    /// Archive member server.
    Zip,
    /// Manual page server.
    Man,
    /// Local script runner.
    Dls,
    /// Gopher relay.
    Gopher,
}

impl DaemonKind {
    /// Every daemon kind.
    pub const ALL: [Self; 5] = [Self::File, Self::Zip, Self::Man, Self::Dls, Self::Gopher];

    /// Binary name.
    pub const fn program_name(self) -> &'static str {
        match self {
            Self::File => "file-dpi",
            Self::Zip => "zip-dpi",
            Self::Man => "man-dpi",
            Self::Dls => "dls-dpi",
            Self::Gopher => "gopher-dpi",
        }
    }

    /// Url scheme the daemon serves.
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::File => FILE_SCHEME,
            Self::Zip => ZIP_SCHEME,
            Self::Man => MAN_SCHEME,
            Self::Dls => DLS_SCHEME,
            Self::Gopher => GOPHER_SCHEME,
        }
    }

    /// Returns `true` for daemons that serve many connections from one
    /// listener. The others serve a single connection on stdin and stdout.
    pub const fn is_multiplexed(self) -> bool {
        matches!(self, Self::File | Self::Zip | Self::Man)
    }

    /// Returns `true` when the daemon renders listings and so honours the
    /// style toggle.
    pub const fn renders_listings(self) -> bool {
        matches!(self, Self::File | Self::Zip)
    }

    /// One-line summary used in help output.
    pub const fn about(self) -> &'static str {
        match self {
            Self::File => "Serves local directories and files.",
            Self::Zip => "Serves listings and members of zip archives.",
            Self::Man => "Serves formatted manual pages.",
            Self::Dls => "Runs one local script and relays its output.",
            Self::Gopher => "Relays one gopher request.",
        }
    }
}

impl fmt::Display for DaemonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_are_distinct() {
        let mut schemes: Vec<_> = DaemonKind::ALL.iter().map(|kind| kind.scheme()).collect();
        schemes.sort_unstable();
        schemes.dedup();
        assert_eq!(schemes.len(), DaemonKind::ALL.len());
    }

    #[test]
    fn only_single_shot_daemons_use_stdio() {
        let single: Vec<_> = DaemonKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_multiplexed())
            .collect();
        assert_eq!(single, [DaemonKind::Dls, DaemonKind::Gopher]);
    }

    #[test]
    fn display_is_the_program_name() {
        assert_eq!(DaemonKind::Zip.to_string(), "zip-dpi");
    }
}
