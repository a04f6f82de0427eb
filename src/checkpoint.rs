//! Durable resume state for a batch run.
//!
//! A [`Checkpoint`] is written after every batch attempt. Its
//! `resume_offset` is always a batch boundary: a batch is either fully
//! accounted for in the checkpoint or not at all.

use crate::core::{CheckpointError, CheckpointStore, Operation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub operation: Operation,
    pub batch_size: usize,
    pub total_records: usize,
    /// Index of the first record not yet accounted for.
    pub resume_offset: usize,
    pub records_written: usize,
    pub batches_failed: usize,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        run_id: impl Into<String>,
        operation: Operation,
        batch_size: usize,
        total_records: usize,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            operation,
            batch_size,
            total_records,
            resume_offset: 0,
            records_written: 0,
            batches_failed: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.resume_offset >= self.total_records
    }

    pub fn remaining(&self) -> usize {
        self.total_records.saturating_sub(self.resume_offset)
    }

    /// Moves the offset past a batch that was written.
    pub(crate) fn record_success(&mut self, batch_len: usize) {
        self.resume_offset += batch_len;
        self.records_written += batch_len;
        self.touch();
    }

    /// Moves the offset past a batch whose retries were exhausted.
    pub(crate) fn record_failure(&mut self, batch_len: usize) {
        self.resume_offset += batch_len;
        self.batches_failed += 1;
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Stores one `batch_state_<run_id>.json` file per run in a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("batch_state_{run_id}.json"))
    }

    fn io_error(run_id: &str, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            run_id: run_id.to_string(),
            source,
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(run_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(run_id, e)),
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&contents).map_err(|source| CheckpointError::Serialization {
                run_id: run_id.to_string(),
                source,
            })?;

        tracing::debug!(
            run_id,
            path = %path.display(),
            resume_offset = checkpoint.resume_offset,
            total_records = checkpoint.total_records,
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    async fn save(&self, run_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint).map_err(|source| {
            CheckpointError::Serialization {
                run_id: run_id.to_string(),
                source,
            }
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_error(run_id, e))?;

        // Write-then-rename so a crash never leaves a truncated checkpoint behind.
        let path = self.path_for(run_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| Self::io_error(run_id, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::io_error(run_id, e))?;
        Ok(())
    }

    async fn clear(&self, run_id: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(run_id, e)),
        }
    }
}

/// In-process checkpoint store. Keeps every saved version for inspection.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    current: Mutex<HashMap<String, Checkpoint>>,
    history: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All checkpoints saved so far, oldest first.
    pub fn history(&self) -> Vec<Checkpoint> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, run_id: &str) -> Option<Checkpoint> {
        self.current
            .lock()
            .ok()
            .and_then(|current| current.get(run_id).cloned())
    }

    fn poisoned(run_id: &str) -> CheckpointError {
        CheckpointError::Io {
            run_id: run_id.to_string(),
            source: std::io::Error::other("checkpoint store lock poisoned"),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let current = self.current.lock().map_err(|_| Self::poisoned(run_id))?;
        Ok(current.get(run_id).cloned())
    }

    async fn save(&self, run_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.current
            .lock()
            .map_err(|_| Self::poisoned(run_id))?
            .insert(run_id.to_string(), checkpoint.clone());
        self.history
            .lock()
            .map_err(|_| Self::poisoned(run_id))?
            .push(checkpoint.clone());
        Ok(())
    }

    async fn clear(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.current
            .lock()
            .map_err(|_| Self::poisoned(run_id))?
            .remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_store_round_trips_and_clears() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        assert!(store.load("patients").await.unwrap().is_none());

        let mut checkpoint = Checkpoint::new("patients", Operation::Insert, 5000, 12_000);
        checkpoint.record_success(5000);
        store.save("patients", &checkpoint).await.unwrap();

        assert!(dir.path().join("batch_state_patients.json").exists());
        let loaded = store.load("patients").await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.remaining(), 7_000);

        store.clear("patients").await.unwrap();
        assert!(store.load("patients").await.unwrap().is_none());
        store.clear("patients").await.unwrap();
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        std::fs::write(store.path_for("broken"), "{not json").unwrap();

        let err = store.load("broken").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Serialization { .. }));
    }

    #[test]
    fn failure_advances_offset_without_counting_writes() {
        let mut checkpoint = Checkpoint::new("run", Operation::Delete, 10, 25);
        checkpoint.record_success(10);
        checkpoint.record_failure(10);
        assert_eq!(checkpoint.resume_offset, 20);
        assert_eq!(checkpoint.records_written, 10);
        assert_eq!(checkpoint.batches_failed, 1);
        assert!(!checkpoint.is_complete());
        checkpoint.record_success(5);
        assert!(checkpoint.is_complete());
    }

    #[tokio::test]
    async fn memory_store_keeps_history() {
        let store = MemoryCheckpointStore::new();
        let mut checkpoint = Checkpoint::new("run", Operation::Insert, 2, 4);
        store.save("run", &checkpoint).await.unwrap();
        checkpoint.record_success(2);
        store.save("run", &checkpoint).await.unwrap();

        let offsets: Vec<usize> = store.history().iter().map(|c| c.resume_offset).collect();
        assert_eq!(offsets, vec![0, 2]);
        assert_eq!(store.get("run").unwrap().resume_offset, 2);

        store.clear("run").await.unwrap();
        assert!(store.load("run").await.unwrap().is_none());
    }
}
