//! Constants for the telemetry-batch-export package.
//!
//! This file centralizes all constants to ensure consistency across the codebase
//! and provide a single source of truth for configuration parameters.

/// Environment variable names for configuration.
///
/// These are only read by [`BatchExportProcessorOptions::from_env`](crate::BatchExportProcessorOptions::from_env);
/// the processor itself never looks at the environment.
pub mod env_vars {
    /// Maximum number of records to queue in the BatchExportProcessor.
    pub const MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";

    /// Maximum batch size for a single export call.
    pub const MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";

    /// Delay in milliseconds between two consecutive scheduled exports.
    pub const EXPORT_INTERVAL: &str = "OTEL_BSP_SCHEDULE_DELAY";

    /// Maximum time in milliseconds a single export may take, -1 for no limit.
    pub const EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";

    /// Log level for the pipeline's own diagnostics.
    pub const LOG_LEVEL: &str = "BATCH_EXPORT_LOG_LEVEL";

    /// Generic log level used when [`LOG_LEVEL`] is not set.
    pub const FALLBACK_LOG_LEVEL: &str = "LOG_LEVEL";
}

/// Default values for configuration parameters.
pub mod defaults {
    /// Default maximum queue size.
    pub const MAX_QUEUE_SIZE: usize = 2048;

    /// Default maximum export batch size.
    pub const MAX_EXPORT_BATCH_SIZE: usize = 512;

    /// Default export interval in milliseconds.
    pub const EXPORT_INTERVAL_MS: u64 = 5000;

    /// Default export timeout in milliseconds.
    pub const EXPORT_TIMEOUT_MS: i64 = 30000;

    /// Export timeout value meaning "no timeout".
    pub const NO_EXPORT_TIMEOUT: i64 = -1;

    /// Upper bound used by blocking bridges when no export timeout is configured.
    pub const BLOCKING_FLUSH_TIMEOUT_MS: u64 = 30000;

    /// A queue-full warning is logged for the first drop and then every Nth.
    pub const DROP_WARNING_INTERVAL: u64 = 100;

    /// Name given to the dedicated export thread.
    pub const WORKER_THREAD_NAME: &str = "batch-export-worker";
}
