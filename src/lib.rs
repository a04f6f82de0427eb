//! Resumable, checkpointed batch loading of records into a document store.
//!
//! A [`BatchRunner`] splits a replayable [`RecordSource`] into fixed-size
//! batches, writes each batch through a [`WriteSink`] and saves a
//! [`Checkpoint`] after every batch so an interrupted run can pick up at
//! the last batch boundary.

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod sink;
pub mod source;
pub mod stats;

pub use crate::checkpoint::{Checkpoint, FileCheckpointStore, MemoryCheckpointStore};
pub use crate::config::{Backoff, BatchConfig, optimal_batch_size};
pub use crate::core::*;
pub use crate::pipeline::BatchRunner;
pub use crate::progress::{LogProgress, NoProgress, Progress};
pub use crate::stats::{BatchReport, RunOutcome, RunStatistics};
