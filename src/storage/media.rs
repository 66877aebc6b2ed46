//! Recording metadata store
//!
//! Records live in `recordings.json` inside the documents directory. Every
//! mutation writes the whole document and is followed by a full re-read, so
//! the in-memory list always reflects what is on disk.

use super::schema::{
    file_uri_to_path, path_to_file_uri, Recording, RecordingUpdate, StorageError, StorageResult,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// File name of the recording table
pub const RECORDINGS_FILE: &str = "recordings.json";

/// Persistent store of saved takes
#[derive(Debug)]
pub struct MediaStore {
    documents_dir: PathBuf,
    recordings: Vec<Recording>,
}

impl MediaStore {
    /// Open the store in `documents_dir`, creating the directory if needed
    ///
    /// A relative directory is resolved against the working directory so
    /// stored URIs stay absolute.
    pub fn open(documents_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let documents_dir = documents_dir.into();
        fs::create_dir_all(&documents_dir)?;
        let documents_dir = std::path::absolute(&documents_dir)?;

        let mut store = Self {
            documents_dir,
            recordings: Vec::new(),
        };
        store.list()?;
        tracing::debug!(
            "Opened media store at {:?} ({} recordings)",
            store.documents_dir,
            store.recordings.len()
        );
        Ok(store)
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    fn table_path(&self) -> PathBuf {
        self.documents_dir.join(RECORDINGS_FILE)
    }

    /// Recordings as of the last read, newest first
    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn get(&self, id: Uuid) -> Option<&Recording> {
        self.recordings.iter().find(|r| r.id == id)
    }

    /// Re-read all recordings, newest first
    pub fn list(&mut self) -> StorageResult<Vec<Recording>> {
        let mut indexed: Vec<(usize, Recording)> =
            self.read_table()?.into_iter().enumerate().collect();

        // Unparseable labels sort last; equal labels by insertion, newest first
        indexed.sort_by(|(ia, a), (ib, b)| {
            b.created()
                .cmp(&a.created())
                .then_with(|| ib.cmp(ia))
        });

        self.recordings = indexed.into_iter().map(|(_, r)| r).collect();
        Ok(self.recordings.clone())
    }

    /// Persist a new recording and return the refreshed list
    pub fn create(
        &mut self,
        script_text: &str,
        video_path: &Path,
    ) -> StorageResult<Vec<Recording>> {
        self.insert(script_text, video_path)?;
        Ok(self.recordings.clone())
    }

    /// Persist a new recording and return it
    ///
    /// The video must already be in durable storage.
    pub fn insert(&mut self, script_text: &str, video_path: &Path) -> StorageResult<Recording> {
        self.check_video(video_path)?;

        let recording = Recording::new(script_text, video_path);
        let mut table = self.read_table()?;
        table.push(recording.clone());
        self.write_table(&table)?;
        self.list()?;

        tracing::info!("Created recording {} -> {:?}", recording.id, video_path);
        Ok(recording)
    }

    /// Change the given fields of a recording and return the refreshed list
    pub fn update(&mut self, id: Uuid, update: RecordingUpdate) -> StorageResult<Vec<Recording>> {
        if update.is_empty() {
            let list = self.list()?;
            return match self.get(id) {
                Some(_) => Ok(list),
                None => Err(StorageError::NotFound(id)),
            };
        }
        if let Some(path) = &update.video_path {
            self.check_video(path)?;
        }

        let mut table = self.read_table()?;
        let recording = table
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StorageError::NotFound(id))?;

        if let Some(text) = update.script_text {
            recording.script_text = text;
        }
        if let Some(path) = update.video_path {
            recording.video_url = path_to_file_uri(&path);
        }
        if let Some(label) = update.created_at {
            recording.created_at = label;
        }

        self.write_table(&table)?;
        tracing::info!("Updated recording {}", id);
        self.list()
    }

    /// Remove a recording and its video file, returning the refreshed list
    pub fn delete(&mut self, id: Uuid) -> StorageResult<Vec<Recording>> {
        let mut table = self.read_table()?;
        let position = table
            .iter()
            .position(|r| r.id == id)
            .ok_or(StorageError::NotFound(id))?;
        let recording = table.remove(position);

        self.write_table(&table)?;
        tracing::info!("Deleted recording {}", id);

        match file_uri_to_path(&recording.video_url) {
            Some(path) if self.is_durable(&path) => match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed video {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                // Left for the orphan sweep
                Err(e) => tracing::error!("Failed to remove video {:?}: {}", path, e),
            },
            _ => tracing::warn!(
                "Recording {} referenced a file outside durable storage: {}",
                id,
                recording.video_url
            ),
        }

        self.list()
    }

    /// Local paths of all referenced video files
    pub fn referenced_paths(&self) -> Vec<PathBuf> {
        self.recordings
            .iter()
            .filter_map(|r| r.video_path())
            .collect()
    }

    fn is_durable(&self, path: &Path) -> bool {
        path.parent() == Some(self.documents_dir.as_path())
    }

    fn check_video(&self, path: &Path) -> StorageResult<()> {
        if !self.is_durable(path) {
            return Err(StorageError::NotDurable(path.display().to_string()));
        }
        if !path.is_file() {
            return Err(StorageError::MissingFile(path.display().to_string()));
        }
        Ok(())
    }

    /// Records in insertion order
    fn read_table(&self) -> StorageResult<Vec<Recording>> {
        let path = self.table_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_table(&self, table: &[Recording]) -> StorageResult<()> {
        let content = serde_json::to_string_pretty(table)?;

        let mut file = NamedTempFile::new_in(&self.documents_dir)?;
        file.write_all(content.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(self.table_path()).map_err(|e| e.error)?;
        Ok(())
    }
}
