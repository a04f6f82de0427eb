use crate::checkpoint::Checkpoint;
use crate::config::BatchConfig;
use crate::core::{
    CheckpointStore, Operation, PipelineError, ProgressObserver, Record, RecordSource,
    RecordStream, Result, RunValidator, WriteError, WriteSink,
};
use crate::progress::{LogProgress, Progress};
use crate::stats::{BatchReport, RunOutcome, RunStatistics};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

enum Attempt {
    Written { attempts: u32 },
    Exhausted { attempts: u32, detail: String },
    Fatal { detail: String },
}

/// Drives the chunk -> write -> checkpoint loop over a record source.
///
/// Batches are written strictly one after another. A checkpoint is saved
/// after every batch, so an interrupted run loses at most the batch that
/// was in flight.
pub struct BatchRunner {
    sink: Box<dyn WriteSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    observer: Box<dyn ProgressObserver>,
    validator: Option<Box<dyn RunValidator>>,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(sink: Box<dyn WriteSink>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            sink,
            checkpoints,
            observer: Box::new(LogProgress),
            validator: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs `validator` once the whole input has been processed. A failed
    /// or erroring validation is logged and recorded in the statistics.
    pub fn with_validator(mut self, validator: Box<dyn RunValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Cancelling the token stops the run before the next batch starts.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn process(
        &mut self,
        source: &dyn RecordSource,
        operation: Operation,
        config: &BatchConfig,
    ) -> Result<RunStatistics> {
        config.validate()?;
        let started = Instant::now();
        let run_id = config.run_id.as_str();

        let total = source.count_records().await?;
        let mut checkpoint = self.prepare_checkpoint(total, operation, config).await?;

        let mut stats = RunStatistics::new(run_id, operation, total);
        stats.start_offset = checkpoint.resume_offset;
        stats.resume_offset = checkpoint.resume_offset;
        stats.prior_records_written = checkpoint.records_written;
        stats.prior_batches_failed = checkpoint.batches_failed;

        tracing::info!(
            run_id,
            operation = %operation,
            total_records = total,
            batch_size = config.batch_size,
            batches = checkpoint.remaining().div_ceil(config.batch_size),
            start_offset = checkpoint.resume_offset,
            "Starting batch run"
        );

        if checkpoint.is_complete() {
            tracing::info!(run_id, "Checkpoint already covers the whole input, nothing to write");
            stats.elapsed = started.elapsed();
            self.validate(&mut stats).await;
            return Ok(stats);
        }

        let mut stream = source.read_from(checkpoint.resume_offset).await?;

        while !checkpoint.is_complete() {
            if self.cancel.is_cancelled() {
                tracing::warn!(
                    run_id,
                    resume_offset = checkpoint.resume_offset,
                    "Cancellation requested, stopping before next batch"
                );
                self.persist(run_id, &mut checkpoint).await?;
                stats.outcome = RunOutcome::Cancelled;
                stats.elapsed = started.elapsed();
                log_summary(&stats);
                return Ok(stats);
            }

            let offset = checkpoint.resume_offset;
            let len = config.batch_size.min(checkpoint.remaining());
            let batch = match next_batch(&mut stream, len, offset).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.persist(run_id, &mut checkpoint).await?;
                    return Err(e);
                }
            };
            let number = offset / config.batch_size + 1;

            tracing::debug!(run_id, batch = number, offset, len, "Writing batch");

            let batch_started = Instant::now();
            let attempt = self.write_with_retry(operation, &batch, number, config).await;
            let batch_took = batch_started.elapsed();

            match attempt {
                Attempt::Written { attempts } => {
                    checkpoint.record_success(len);
                    self.persist(run_id, &mut checkpoint).await?;
                    stats.record_batch(report(number, offset, len, attempts, true));
                }
                Attempt::Exhausted { attempts, detail } => {
                    tracing::error!(
                        run_id,
                        batch = number,
                        attempts,
                        error = %detail,
                        "Batch failed after exhausting retries, continuing with next batch"
                    );
                    checkpoint.record_failure(len);
                    self.persist(run_id, &mut checkpoint).await?;
                    stats.record_batch(report(number, offset, len, attempts, false));
                }
                Attempt::Fatal { detail } => {
                    tracing::error!(
                        run_id,
                        batch = number,
                        error = %detail,
                        resume_offset = offset,
                        "Fatal write failure, aborting run"
                    );
                    if let Err(e) = self.persist(run_id, &mut checkpoint).await {
                        tracing::error!(
                            run_id,
                            error = %e,
                            "Failed to persist checkpoint after fatal write failure"
                        );
                    }
                    stats.outcome = RunOutcome::Aborted;
                    stats.elapsed = started.elapsed();
                    log_summary(&stats);
                    return Err(PipelineError::FatalWrite {
                        batch: number,
                        detail,
                        stats: Box::new(stats),
                    });
                }
            }

            let progress = Progress::new(checkpoint.resume_offset, total, started.elapsed())
                .with_batch(len, batch_took)
                .with_run_average(checkpoint.resume_offset - stats.start_offset);
            self.observer.on_progress(&progress);
        }

        source.close().await?;

        stats.outcome = if stats.batches_failed > 0 {
            RunOutcome::CompletedWithFailures
        } else {
            RunOutcome::Completed
        };
        stats.elapsed = started.elapsed();
        self.validate(&mut stats).await;
        log_summary(&stats);
        Ok(stats)
    }

    /// Flushes and releases the sink.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await
    }

    async fn prepare_checkpoint(
        &self,
        total: usize,
        operation: Operation,
        config: &BatchConfig,
    ) -> Result<Checkpoint> {
        let run_id = config.run_id.as_str();

        if config.resume {
            if let Some(mut existing) = self.checkpoints.load(run_id).await? {
                if existing.total_records != total || existing.resume_offset > total {
                    return Err(PipelineError::ConfigMismatch {
                        run_id: run_id.to_string(),
                        expected: format!(
                            "{} records (resume offset {})",
                            existing.total_records, existing.resume_offset
                        ),
                        found: format!("{total} records"),
                    });
                }
                if existing.operation != operation {
                    return Err(PipelineError::ConfigMismatch {
                        run_id: run_id.to_string(),
                        expected: format!("operation '{}'", existing.operation),
                        found: format!("operation '{operation}'"),
                    });
                }

                tracing::info!(
                    run_id,
                    resume_offset = existing.resume_offset,
                    total_records = existing.total_records,
                    records_written = existing.records_written,
                    batches_failed = existing.batches_failed,
                    "Resuming from checkpoint"
                );
                existing.batch_size = config.batch_size;
                return Ok(existing);
            }
        }

        let checkpoint = Checkpoint::new(run_id, operation, config.batch_size, total);
        self.checkpoints.save(run_id, &checkpoint).await?;
        Ok(checkpoint)
    }

    async fn write_with_retry(
        &mut self,
        operation: Operation,
        batch: &[Record],
        number: usize,
        config: &BatchConfig,
    ) -> Attempt {
        let max_attempts = config.max_retries_per_batch.saturating_add(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.sink.write(operation, batch).await {
                Ok(()) => {
                    if attempts > 1 {
                        tracing::info!(batch = number, attempts, "Batch written after retry");
                    }
                    return Attempt::Written { attempts };
                }
                Err(WriteError::Fatal { detail }) => return Attempt::Fatal { detail },
                Err(WriteError::Retryable { detail }) => {
                    if attempts >= max_attempts {
                        return Attempt::Exhausted { attempts, detail };
                    }
                    let delay = config.backoff.delay_for(attempts);
                    tracing::warn!(
                        batch = number,
                        attempt = attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %detail,
                        "Batch write failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn validate(&self, stats: &mut RunStatistics) {
        let Some(validator) = &self.validator else {
            return;
        };
        let passed = match validator.validate(stats).await {
            Ok(true) => {
                tracing::info!(run_id = %stats.run_id, "Validation passed");
                true
            }
            Ok(false) => {
                tracing::warn!(run_id = %stats.run_id, "Validation failed");
                false
            }
            Err(e) => {
                tracing::error!(run_id = %stats.run_id, error = %e, "Validation errored");
                false
            }
        };
        stats.validated = Some(passed);
    }

    async fn persist(&self, run_id: &str, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.touch();
        self.checkpoints.save(run_id, checkpoint).await?;
        Ok(())
    }
}

async fn next_batch(stream: &mut RecordStream, len: usize, offset: usize) -> Result<Vec<Record>> {
    let mut batch = Vec::with_capacity(len);
    while batch.len() < len {
        match stream.next().await {
            Some(record) => batch.push(record?),
            None => {
                return Err(PipelineError::Source(anyhow::anyhow!(
                    "input ended at record {} but {} more were expected",
                    offset + batch.len(),
                    len - batch.len()
                )));
            }
        }
    }
    Ok(batch)
}

fn report(
    number: usize,
    offset: usize,
    len: usize,
    attempts: u32,
    succeeded: bool,
) -> BatchReport {
    BatchReport {
        number,
        offset,
        len,
        attempts,
        succeeded,
        finished_at: Utc::now(),
    }
}

fn log_summary(stats: &RunStatistics) {
    tracing::info!(
        run_id = %stats.run_id,
        outcome = ?stats.outcome,
        total_records = stats.total_records,
        records_written = stats.records_written,
        records_failed = stats.records_failed,
        batches_succeeded = stats.batches_succeeded,
        batches_failed = stats.batches_failed,
        batches_retried = stats.batches_retried,
        duration_secs = %format!("{:.2}", stats.elapsed.as_secs_f64()),
        records_per_sec = %format!("{:.2}", stats.records_per_second()),
        validated = ?stats.validated,
        "Batch run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::progress::NoProgress;
    use crate::sink::memory::MemoryCollection;
    use crate::source::memory::VecSource;
    use serde_json::json;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut record = Record::new();
                record.set_field("id", json!(i));
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn writes_every_record_into_collection() {
        let collection = MemoryCollection::new();
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut runner = BatchRunner::new(Box::new(collection.clone()), store.clone())
            .with_observer(Box::new(NoProgress));

        let source = VecSource::new(records(7));
        let config = BatchConfig::new("unit").with_batch_size(3);
        let stats = runner
            .process(&source, Operation::Insert, &config)
            .await
            .unwrap();

        assert_eq!(stats.records_written, 7);
        assert_eq!(stats.batches_attempted, 3);
        assert_eq!(collection.len(), 7);
        assert_eq!(store.get("unit").unwrap().resume_offset, 7);
    }

    #[tokio::test]
    async fn short_source_is_reported() {
        struct Shrinking(VecSource);

        #[async_trait::async_trait]
        impl RecordSource for Shrinking {
            async fn count_records(&self) -> Result<usize> {
                Ok(self.0.count_records().await? + 2)
            }

            async fn read_from(&self, offset: usize) -> Result<RecordStream> {
                self.0.read_from(offset).await
            }
        }

        let store = Arc::new(MemoryCheckpointStore::new());
        let mut runner = BatchRunner::new(Box::new(MemoryCollection::new()), store.clone())
            .with_observer(Box::new(NoProgress));
        let source = Shrinking(VecSource::new(records(4)));
        let config = BatchConfig::new("short").with_batch_size(3);

        let err = runner
            .process(&source, Operation::Insert, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
        assert_eq!(store.get("short").unwrap().resume_offset, 3);
    }
}
