use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::trace;

use crate::{Entry, Listing, ListingError};

/// Returns `true` for names a listing never shows: `.`, `..`, dotfiles,
/// `#autosave#` files and `backup~` files.
pub fn is_hidden_name(name: &OsStr) -> bool {
    let bytes = name.as_bytes();
    matches!(bytes.first(), None | Some(b'.' | b'#')) || bytes.last() == Some(&b'~')
}

/// Lists the visible entries of `path` in display order.
///
/// Entries are stat'ed through symlinks; entries whose metadata cannot be
/// read are skipped.
pub fn scan_directory(path: &Path) -> Result<Listing, ListingError> {
    let unreadable = |source| ListingError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for item in fs::read_dir(path).map_err(unreadable)? {
        let item = item.map_err(unreadable)?;
        let name = item.file_name();
        if is_hidden_name(&name) {
            continue;
        }
        let reference = path.join(&name);
        match fs::metadata(&reference) {
            Ok(metadata) => entries.push(Entry::from_metadata(name, reference, &metadata)),
            Err(err) => trace!(path = %reference.display(), error = %err, "skipping entry"),
        }
    }
    Ok(Listing::from_entries(entries))
}
