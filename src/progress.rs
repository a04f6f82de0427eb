use crate::core::ProgressObserver;
use std::time::Duration;

/// Snapshot handed to the observer after every batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Records accounted for so far, including those skipped on resume.
    pub processed: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Records per second of the batch that just finished.
    pub rate: f64,
    /// Records per second over this run so far.
    pub average_rate: f64,
}

impl Progress {
    pub fn new(processed: usize, total: usize, elapsed: Duration) -> Self {
        Self {
            processed,
            total,
            elapsed,
            rate: 0.0,
            average_rate: 0.0,
        }
    }

    /// Sets the instantaneous rate from the last batch's size and write time.
    pub fn with_batch(mut self, len: usize, took: Duration) -> Self {
        self.rate = per_second(len, took);
        self
    }

    /// Sets the run average from the records handled since the run started.
    pub fn with_run_average(mut self, processed_this_run: usize) -> Self {
        self.average_rate = per_second(processed_this_run, self.elapsed);
        self
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }
}

fn per_second(records: usize, took: Duration) -> f64 {
    let secs = took.as_secs_f64();
    if secs > 0.0 {
        records as f64 / secs
    } else {
        0.0
    }
}

/// Emits one `info` event per batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, progress: &Progress) {
        tracing::info!(
            processed = progress.processed,
            total = progress.total,
            elapsed_secs = %format!("{:.2}", progress.elapsed.as_secs_f64()),
            rate = %format!("{:.0}", progress.rate),
            average_rate = %format!("{:.0}", progress.average_rate),
            "Progress {:.1}%",
            progress.percent()
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: &Progress) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_rate_and_run_average_are_separate() {
        let progress = Progress::new(7_000, 12_000, Duration::from_secs(4))
            .with_batch(1_000, Duration::from_millis(250))
            .with_run_average(2_000);
        assert_eq!(progress.rate, 4_000.0);
        assert_eq!(progress.average_rate, 500.0);
        assert!((progress.percent() - 58.33).abs() < 0.01);
    }

    #[test]
    fn empty_input_is_fully_processed() {
        let progress = Progress::new(0, 0, Duration::ZERO)
            .with_batch(0, Duration::ZERO)
            .with_run_average(0);
        assert_eq!(progress.rate, 0.0);
        assert_eq!(progress.average_rate, 0.0);
        assert_eq!(progress.percent(), 100.0);
    }
}
