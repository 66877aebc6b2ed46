//! Durable video storage
//!
//! Copies finished videos out of the temporary directory into the app's
//! documents directory under unique names.

use super::schema::{StorageError, StorageResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension of durable video files
pub const VIDEO_EXTENSION: &str = "mp4";

/// Durable file storage rooted at the documents directory
#[derive(Debug, Clone)]
pub struct FileStore {
    documents_dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `documents_dir`, resolved to an absolute path
    pub fn new(documents_dir: impl Into<PathBuf>) -> Self {
        let documents_dir = documents_dir.into();
        let documents_dir = std::path::absolute(&documents_dir).unwrap_or(documents_dir);
        Self { documents_dir }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Copy `temp` into durable storage under a new unique name
    ///
    /// The temporary file is left untouched. A partially written copy is
    /// removed before the error is returned.
    pub async fn save(&self, temp: &Path) -> StorageResult<PathBuf> {
        if !temp.is_file() {
            tracing::error!("Cannot save {:?}: file does not exist", temp);
            return Err(StorageError::MissingFile(temp.display().to_string()));
        }

        tokio::fs::create_dir_all(&self.documents_dir).await?;
        let destination = self
            .documents_dir
            .join(format!("{}.{}", Uuid::new_v4(), VIDEO_EXTENSION));

        match tokio::fs::copy(temp, &destination).await {
            Ok(bytes) => {
                tracing::info!("Saved {:?} to {:?} ({} bytes)", temp, destination, bytes);
                Ok(destination)
            }
            Err(e) => {
                tracing::error!("Failed to copy {:?} into durable storage: {}", temp, e);
                let _ = tokio::fs::remove_file(&destination).await;
                Err(e.into())
            }
        }
    }

    /// Whether `path` is a file directly inside durable storage
    pub fn is_durable(&self, path: &Path) -> bool {
        path.parent() == Some(self.documents_dir.as_path())
    }

    /// Remove a durable file; a missing file is not an error
    pub async fn remove(&self, path: &Path) -> StorageResult<()> {
        if !self.is_durable(path) {
            return Err(StorageError::NotDurable(path.display().to_string()));
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!("Removed {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove video files in durable storage that no record refers to
    ///
    /// Returns the removed paths.
    pub async fn sweep_orphans(&self, referenced: &[PathBuf]) -> StorageResult<Vec<PathBuf>> {
        let referenced: HashSet<&Path> = referenced.iter().map(|p| p.as_path()).collect();
        let mut removed = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.documents_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_video = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(VIDEO_EXTENSION))
                .unwrap_or(false);
            if !is_video || !entry.file_type().await?.is_file() {
                continue;
            }
            if referenced.contains(path.as_path()) {
                continue;
            }

            tokio::fs::remove_file(&path).await?;
            tracing::info!("Removed orphaned video {:?}", path);
            removed.push(path);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_copies_under_unique_name() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("cropped.mp4");
        std::fs::write(&temp, b"video").unwrap();
        let store = FileStore::new(dir.path().join("Documents"));

        let first = store.save(&temp).await.unwrap();
        let second = store.save(&temp).await.unwrap();

        assert_ne!(first, second);
        assert!(store.is_durable(&first));
        assert_eq!(std::fs::read(&first).unwrap(), b"video");
        assert!(temp.exists());
    }

    #[tokio::test]
    async fn test_save_missing_file_fails_without_output() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("Documents"));

        let result = store.save(&dir.path().join("gone.mp4")).await;
        assert!(matches!(result, Err(StorageError::MissingFile(_))));
        assert!(!store.documents_dir().exists());
    }

    #[tokio::test]
    async fn test_remove_rejects_paths_outside_storage() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("keep.mp4");
        std::fs::write(&outside, b"x").unwrap();
        let store = FileStore::new(dir.path().join("Documents"));

        assert!(matches!(
            store.remove(&outside).await,
            Err(StorageError::NotDurable(_))
        ));
        assert!(outside.exists());
        store
            .remove(&store.documents_dir().join("missing.mp4"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_keeps_referenced_files() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("take.mp4");
        std::fs::write(&temp, b"video").unwrap();
        let store = FileStore::new(dir.path().join("Documents"));

        let kept = store.save(&temp).await.unwrap();
        let orphan = store.save(&temp).await.unwrap();
        std::fs::write(store.documents_dir().join("recordings.json"), "[]").unwrap();

        let removed = store.sweep_orphans(&[kept.clone()]).await.unwrap();
        assert_eq!(removed, vec![orphan.clone()]);
        assert!(kept.exists());
        assert!(!orphan.exists());
        assert!(store.documents_dir().join("recordings.json").exists());
    }
}
