use crate::core::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Delay inserted before each retry of a failed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(retry - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay before retry number `retry` (the first retry is 1).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let shift = retry.saturating_sub(1).min(32);
                let delay = base_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_retries_per_batch: u32,
    pub resume: bool,
    pub run_id: String,
    pub backoff: Backoff,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries_per_batch: DEFAULT_MAX_RETRIES,
            resume: true,
            run_id: "migration".to_string(),
            backoff: Backoff::None,
        }
    }
}

impl BatchConfig {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries_per_batch: u32) -> Self {
        self.max_retries_per_batch = max_retries_per_batch;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.run_id.trim().is_empty() {
            return Err(PipelineError::Config("run_id must not be empty".to_string()));
        }
        if self
            .run_id
            .chars()
            .any(|c| matches!(c, '/' | '\\') || c.is_control())
        {
            return Err(PipelineError::Config(format!(
                "run_id '{}' contains path separators or control characters",
                self.run_id
            )));
        }
        Ok(())
    }
}

/// Picks a batch size for `total_items`: small inputs get small batches so
/// progress is still reported a few times.
pub fn optimal_batch_size(total_items: usize, max_batch_size: usize) -> usize {
    let size = if total_items <= 1_000 {
        total_items.min(100)
    } else if total_items <= 10_000 {
        total_items.min(1_000)
    } else {
        max_batch_size
    };
    size.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BatchConfig::default();
        assert_eq!(config.batch_size, 5000);
        assert_eq!(config.max_retries_per_batch, 1);
        assert!(config.resume);
        assert_eq!(config.backoff, Backoff::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: BatchConfig =
            serde_json::from_str(r#"{"run_id": "patients", "batch_size": 250}"#).unwrap();
        assert_eq!(config.run_id, "patients");
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.max_retries_per_batch, 1);
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(BatchConfig::new("x").with_batch_size(0).validate().is_err());
        assert!(BatchConfig::new("  ").validate().is_err());
        assert!(BatchConfig::new("../etc").validate().is_err());
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base_ms: 100,
            max_ms: 1_000,
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(10), Duration::from_millis(1_000));
        assert_eq!(Backoff::None.delay_for(5), Duration::ZERO);
    }

    #[test]
    fn optimal_batch_size_scales_with_input() {
        assert_eq!(optimal_batch_size(0, 5000), 1);
        assert_eq!(optimal_batch_size(40, 5000), 40);
        assert_eq!(optimal_batch_size(900, 5000), 100);
        assert_eq!(optimal_batch_size(9_000, 5000), 1_000);
        assert_eq!(optimal_batch_size(55_000, 5000), 5000);
    }
}
