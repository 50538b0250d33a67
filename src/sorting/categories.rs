//! Category store: one directory per category under the output root
//!
//! The category set is never stored on its own, it is always read back from the
//! directory listing (and grown in memory while a batch runs).

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::SortError;

/// Every immediate subdirectory name of `root`; a missing root means no categories yet.
pub fn list_categories(root: &Path) -> Result<BTreeSet<String>, SortError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(SortError::io(root, e)),
    };

    let mut categories = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| SortError::io(root, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
            || entry.path().is_dir();
        if !is_dir {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => {
                categories.insert(name);
            }
            Err(raw) => {
                tracing::warn!(name = ?raw, "Skipping category directory with non UTF-8 name");
            }
        }
    }

    Ok(categories)
}

/// Reject names that cannot map 1:1 onto a single directory level
pub fn validate_category_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("category name is empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("{:?} is not a directory name", name));
    }
    if name.contains(['/', '\\']) {
        return Err(format!("{:?} contains a path separator", name));
    }
    if name.contains(['\n', '\r']) {
        return Err(format!("{:?} contains a newline", name));
    }
    Ok(())
}

/// Create the directory for `name` under `root` if it does not exist yet.
pub fn ensure_category(root: &Path, name: &str) -> Result<PathBuf, SortError> {
    validate_category_name(name).map_err(|_| SortError::InvalidCategoryName(name.to_string()))?;

    let dir = root.join(name);
    fs::create_dir_all(&dir).map_err(|e| SortError::io(&dir, e))?;
    Ok(dir)
}
