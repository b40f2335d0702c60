//! Error types for the batch export pipeline.
//!
//! None of these ever reach a producer calling
//! [`BatchExportProcessor::on_record`](crate::BatchExportProcessor::on_record):
//! export failures are logged and absorbed by the worker, and only the
//! construction, flush and shutdown paths return them.

use std::time::Duration;
use thiserror::Error;

/// Invalid [`BatchExportProcessorOptions`](crate::BatchExportProcessorOptions).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_queue_size must be at least 1, got {0}")]
    InvalidQueueSize(usize),

    #[error("max_export_batch_size must be at least 1, got {0}")]
    InvalidBatchSize(usize),

    #[error("max_export_batch_size ({batch}) must not exceed max_queue_size ({queue})")]
    BatchLargerThanQueue { batch: usize, queue: usize },

    #[error("export_interval_ms must be at least 1, got {0}")]
    InvalidExportInterval(u64),

    #[error("export_timeout_ms must be -1 or greater, got {0}")]
    InvalidExportTimeout(i64),
}

/// Why a single export call did not deliver its batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to serialize batch: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("destination rejected the batch with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("exporter panicked: {0}")]
    Panicked(String),

    #[error("exporter is shut down")]
    Shutdown,
}

/// Errors surfaced by processor construction, flush and shutdown.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn export worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// `dropped` is `None` when the caller stopped waiting before the worker
    /// could report how many records it discarded.
    #[error("operation cancelled before the queue was drained{}", dropped_suffix(.dropped))]
    Cancelled { dropped: Option<usize> },

    #[error("export worker is no longer running")]
    WorkerGone,

    #[error("exporter failed to shut down: {0}")]
    Exporter(#[from] ExportError),
}

fn dropped_suffix(dropped: &Option<usize>) -> String {
    match dropped {
        Some(count) => format!(", {} records dropped", count),
        None => String::new(),
    }
}
