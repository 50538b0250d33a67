//! Files a classified document into its category directory

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use super::categories::ensure_category;
use super::{ClassificationResult, Document, Naming, SortError};
use crate::utils::slugify_filename;

/// Moves documents into `<output_root>/<category>/<name>.pdf`
#[derive(Debug, Clone, Copy)]
pub struct FileOrganizer {
    naming: Naming,
}

impl FileOrganizer {
    pub fn new(naming: Naming) -> Self {
        Self { naming }
    }

    pub fn naming(&self) -> Naming {
        self.naming
    }

    /// File name the document gets inside its category directory
    pub fn target_file_name(&self, document: &Document, result: &ClassificationResult) -> String {
        let original = document
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        match self.naming {
            Naming::Original => original,
            Naming::Title => {
                let title = result.title.as_deref().or(document.title.as_deref()).unwrap_or_default();
                let slug = slugify_filename(title);
                if slug.is_empty() || slug == "." || slug == ".." {
                    // Nothing usable left of the title
                    original
                } else {
                    format!("{}.pdf", slug)
                }
            }
        }
    }

    /// Move `document` into its category directory and return the new path.
    ///
    /// An existing file at the destination is never overwritten.
    pub fn organize(
        &self,
        document: &Document,
        result: &ClassificationResult,
        output_root: &Path,
    ) -> Result<PathBuf, SortError> {
        let target_dir = ensure_category(output_root, &result.category)?;
        let target = target_dir.join(self.target_file_name(document, result));

        if target.exists() {
            return Err(SortError::Collision(target));
        }

        move_no_clobber(&document.path, &target)?;
        Ok(target)
    }
}

/// Rename, falling back to copy + delete when the rename is refused (other filesystem)
fn move_no_clobber(from: &Path, to: &Path) -> Result<(), SortError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.exists() {
                return Err(SortError::io(from, rename_err));
            }
            tracing::debug!(from = %from.display(), error = %rename_err, "rename failed, copying instead");

            let mut source = fs::File::open(from).map_err(|e| SortError::io(from, e))?;
            let mut dest = match OpenOptions::new().write(true).create_new(true).open(to) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(SortError::Collision(to.to_path_buf()));
                }
                Err(e) => return Err(SortError::io(to, e)),
            };
            if let Err(e) = io::copy(&mut source, &mut dest) {
                let _ = fs::remove_file(to);
                return Err(SortError::io(to, e));
            }
            fs::remove_file(from).map_err(|e| SortError::io(from, e))
        }
    }
}
