use crate::stats::RunStatistics;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source error: {0}")]
    Source(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Checkpoint mismatch for run '{run_id}': checkpoint recorded {expected}, input has {found}"
    )]
    ConfigMismatch {
        run_id: String,
        expected: String,
        found: String,
    },

    /// `stats` holds the counters of the run up to the failing batch.
    #[error("Fatal write failure on batch {batch}: {detail}")]
    FatalWrite {
        batch: usize,
        detail: String,
        stats: Box<RunStatistics>,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome classification a write sink attaches to a failed batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Transient failure; the same batch may be written again.
    #[error("retryable write failure: {detail}")]
    Retryable { detail: String },

    /// Structural failure (permissions, connectivity, unsupported operation).
    #[error("fatal write failure: {detail}")]
    Fatal { detail: String },
}

impl WriteError {
    pub fn retryable(detail: impl Into<String>) -> Self {
        WriteError::Retryable {
            detail: detail.into(),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        WriteError::Fatal {
            detail: detail.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, WriteError::Fatal { .. })
    }
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for run '{run_id}': {source}")]
    Io {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint for run '{run_id}' is not valid JSON: {source}")]
    Serialization {
        run_id: String,
        #[source]
        source: serde_json::Error,
    },
}
