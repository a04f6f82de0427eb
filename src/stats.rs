use crate::core::Operation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every batch of this run was written.
    Completed,
    /// The run reached the end of the input but some batches exhausted their retries.
    CompletedWithFailures,
    /// Stopped between batches on request; the checkpoint allows resuming.
    Cancelled,
    /// Stopped by a fatal write failure. Only seen on the statistics carried
    /// by `PipelineError::FatalWrite`.
    Aborted,
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// 1-based position of the batch in the whole input.
    pub number: usize,
    pub offset: usize,
    pub len: usize,
    pub attempts: u32,
    pub succeeded: bool,
    pub finished_at: DateTime<Utc>,
}

/// Counters for a single invocation of the batch runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub run_id: String,
    pub operation: Operation,
    pub total_records: usize,
    /// Offset the run started from (non-zero when resumed).
    pub start_offset: usize,
    /// Offset persisted in the last checkpoint of this run.
    pub resume_offset: usize,
    pub batches_attempted: usize,
    pub batches_succeeded: usize,
    pub batches_failed: usize,
    /// Batches that only went through after at least one retry.
    pub batches_retried: usize,
    pub records_written: usize,
    pub records_failed: usize,
    /// Counters restored from the checkpoint of an earlier run.
    pub prior_records_written: usize,
    pub prior_batches_failed: usize,
    pub elapsed: Duration,
    pub outcome: RunOutcome,
    /// Result of the post-run validator, `None` when none ran.
    pub validated: Option<bool>,
    pub batches: Vec<BatchReport>,
}

impl RunStatistics {
    pub(crate) fn new(run_id: &str, operation: Operation, total_records: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            operation,
            total_records,
            start_offset: 0,
            resume_offset: 0,
            batches_attempted: 0,
            batches_succeeded: 0,
            batches_failed: 0,
            batches_retried: 0,
            records_written: 0,
            records_failed: 0,
            prior_records_written: 0,
            prior_batches_failed: 0,
            elapsed: Duration::ZERO,
            outcome: RunOutcome::Completed,
            validated: None,
            batches: Vec::new(),
        }
    }

    pub(crate) fn record_batch(&mut self, report: BatchReport) {
        self.batches_attempted += 1;
        if report.succeeded {
            self.batches_succeeded += 1;
            self.records_written += report.len;
            if report.attempts > 1 {
                self.batches_retried += 1;
            }
        } else {
            self.batches_failed += 1;
            self.records_failed += report.len;
        }
        self.resume_offset = report.offset + report.len;
        self.batches.push(report);
    }

    pub fn cumulative_records_written(&self) -> usize {
        self.prior_records_written + self.records_written
    }

    pub fn cumulative_batches_failed(&self) -> usize {
        self.prior_batches_failed + self.batches_failed
    }

    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records_written as f64 / secs
        } else {
            0.0
        }
    }

    /// True when the whole input has been processed with no failed batch,
    /// in this run or the ones it resumed, and validation (if any) passed.
    /// The caller may then clear the checkpoint.
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Completed
            && self.cumulative_batches_failed() == 0
            && self.validated != Some(false)
    }
}
