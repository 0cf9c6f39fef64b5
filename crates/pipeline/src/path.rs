//! Request path validation and resolution.

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Characters a [`ShellSafePath`] may never contain.
pub const SHELL_METACHARACTERS: &[char] = &['"', '$', '`', '#', '<', '>', '|', '\\'];

/// Why a path could not be validated or resolved.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The path contains a shell metacharacter.
    #[error("path contains forbidden character '{0}'")]
    UnsafeCharacter(char),
    /// The path is not valid UTF-8.
    #[error("path is not valid UTF-8")]
    NotUtf8,
    /// The longest existing prefix is a directory.
    #[error("{} is a directory", .0.display())]
    IsDirectory(PathBuf),
    /// No prefix of the path exists.
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),
}

/// A UTF-8 path free of [`SHELL_METACHARACTERS`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShellSafePath(String);

impl ShellSafePath {
    /// Validates `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ResolveError> {
        let text = path.as_ref().to_str().ok_or(ResolveError::NotUtf8)?;
        if let Some(found) = text.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
            return Err(ResolveError::UnsafeCharacter(found));
        }
        Ok(Self(text.to_owned()))
    }

    /// The validated text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The validated path.
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for ShellSafePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path split at its longest existing file prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The existing non-directory file.
    pub file: PathBuf,
    /// What followed the file, without leading slashes. Empty when the whole
    /// path named the file.
    pub remainder: PathBuf,
}

/// Walks `path` from its full length back through each `/` and returns the
/// first prefix that exists. That prefix must not be a directory.
pub fn resolve_existing_file(path: &Path) -> Result<ResolvedPath, ResolveError> {
    let bytes = path.as_os_str().as_bytes();
    let mut end = bytes.len();
    loop {
        if end > 0 {
            let candidate = Path::new(OsStr::from_bytes(&bytes[..end]));
            if let Ok(metadata) = fs::metadata(candidate) {
                if metadata.is_dir() {
                    return Err(ResolveError::IsDirectory(candidate.to_path_buf()));
                }
                let rest = &bytes[end..];
                let skip = rest.iter().take_while(|&&byte| byte == b'/').count();
                return Ok(ResolvedPath {
                    file: candidate.to_path_buf(),
                    remainder: PathBuf::from(OsStr::from_bytes(&rest[skip..])),
                });
            }
        }
        match bytes[..end].iter().rposition(|&byte| byte == b'/') {
            Some(slash) => end = slash,
            None => return Err(ResolveError::NotFound(path.to_path_buf())),
        }
    }
}

/// An archive file and an optional member inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivePath {
    archive: ShellSafePath,
    member: Option<ShellSafePath>,
}

impl ArchivePath {
    /// The archive file.
    pub fn archive(&self) -> &ShellSafePath {
        &self.archive
    }

    /// The member path inside the archive, if one was addressed.
    pub fn member(&self) -> Option<&ShellSafePath> {
        self.member.as_ref()
    }

    /// Returns `true` when the archive itself, or a directory inside it, was
    /// addressed.
    pub fn is_listing(&self) -> bool {
        self.member
            .as_ref()
            .is_none_or(|member| member.as_str().ends_with('/'))
    }
}

/// Validates `path` and splits it into archive and member.
///
/// Metacharacters are rejected before the filesystem is consulted.
pub fn resolve_archive_path(path: &Path) -> Result<ArchivePath, ResolveError> {
    ShellSafePath::new(path)?;
    let resolved = resolve_existing_file(path)?;
    let member = if resolved.remainder.as_os_str().is_empty() {
        None
    } else {
        Some(ShellSafePath::new(&resolved.remainder)?)
    };
    Ok(ArchivePath {
        archive: ShellSafePath::new(&resolved.file)?,
        member,
    })
}
