use crate::checkpoint::Checkpoint;
use crate::core::{CheckpointError, Operation, Record, Result, WriteError};
use crate::progress::Progress;
use crate::stats::RunStatistics;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record>> + Send>>;

/// A finite, replayable input.
///
/// `read_from(n)` must yield the same records as `read_from(0)` with the
/// first `n` skipped, on every call.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn count_records(&self) -> Result<usize>;

    async fn read_from(&self, offset: usize) -> Result<RecordStream>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Pre-authorized handle on the target collection.
#[async_trait]
pub trait WriteSink: Send {
    async fn write(
        &mut self,
        operation: Operation,
        batch: &[Record],
    ) -> std::result::Result<(), WriteError>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, run_id: &str) -> std::result::Result<Option<Checkpoint>, CheckpointError>;

    async fn save(
        &self,
        run_id: &str,
        checkpoint: &Checkpoint,
    ) -> std::result::Result<(), CheckpointError>;

    /// Removes the checkpoint for `run_id`. Clearing a missing checkpoint is not an error.
    async fn clear(&self, run_id: &str) -> std::result::Result<(), CheckpointError>;
}

/// Receives a notification after every batch. Must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

/// Check that runs once the whole input has been processed, e.g. comparing the
/// collection's document count with the input length.
#[async_trait]
pub trait RunValidator: Send + Sync {
    async fn validate(&self, stats: &RunStatistics) -> Result<bool>;
}

#[async_trait]
impl<F> RunValidator for F
where
    F: Fn(&RunStatistics) -> bool + Send + Sync,
{
    async fn validate(&self, stats: &RunStatistics) -> Result<bool> {
        Ok(self(stats))
    }
}
