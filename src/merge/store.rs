//! Output media store
//!
//! The merger hands a finished file to a [`MediaStore`]; only after the
//! store accepts it are the work-directory temporaries removed.

use crate::merge::types::MergeError;
use std::path::{Path, PathBuf};

/// Destination for a finished merge output.
pub trait MediaStore: Send + Sync {
    /// Take ownership of `file` and return its final location.
    fn save(&self, file: &Path) -> Result<PathBuf, MergeError>;
}

/// Stores outputs as files in a directory.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MediaStore for DirectoryStore {
    fn save(&self, file: &Path) -> Result<PathBuf, MergeError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| MergeError::SaveFailed(format!("cannot create store dir: {e}")))?;

        let name = file
            .file_name()
            .ok_or_else(|| MergeError::SaveFailed("output has no file name".into()))?;
        let destination = self.root.join(name);

        // Rename fails across filesystems; fall back to copy + remove
        if std::fs::rename(file, &destination).is_err() {
            std::fs::copy(file, &destination)
                .map_err(|e| MergeError::SaveFailed(format!("copy into store failed: {e}")))?;
            let _ = std::fs::remove_file(file);
        }

        tracing::info!(path = %destination.display(), "merge output saved");
        Ok(destination)
    }
}
