//! Batch export processor configuration.
//!
//! Options are immutable once built and always valid: every constructor runs
//! the same validation and returns a [`ConfigError`] instead of clamping.
//!
//! ```
//! use telemetry_batch_export::BatchExportProcessorOptions;
//!
//! let options = BatchExportProcessorOptions::builder()
//!     .max_queue_size(4096)
//!     .max_export_batch_size(1024)
//!     .build()
//!     .unwrap();
//! assert_eq!(options.export_interval_ms(), 5000);
//!
//! let invalid = BatchExportProcessorOptions::builder()
//!     .max_queue_size(10)
//!     .max_export_batch_size(20)
//!     .build();
//! assert!(invalid.is_err());
//! ```

use crate::constants::{defaults, env_vars};
use crate::error::ConfigError;
use crate::logger::Logger;
use bon::bon;
use std::env;
use std::str::FromStr;
use std::time::Duration;

static LOGGER: Logger = Logger::const_new("options");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchExportProcessorOptions {
    max_queue_size: usize,
    max_export_batch_size: usize,
    export_interval_ms: u64,
    export_timeout_ms: i64,
}

#[bon]
impl BatchExportProcessorOptions {
    /// Creates validated options, falling back to the defaults for omitted values.
    #[builder]
    pub fn new(
        #[builder(default = defaults::MAX_QUEUE_SIZE)] max_queue_size: usize,
        #[builder(default = defaults::MAX_EXPORT_BATCH_SIZE)] max_export_batch_size: usize,
        #[builder(default = defaults::EXPORT_INTERVAL_MS)] export_interval_ms: u64,
        #[builder(default = defaults::EXPORT_TIMEOUT_MS)] export_timeout_ms: i64,
    ) -> Result<Self, ConfigError> {
        if max_queue_size < 1 {
            return Err(ConfigError::InvalidQueueSize(max_queue_size));
        }
        if max_export_batch_size < 1 {
            return Err(ConfigError::InvalidBatchSize(max_export_batch_size));
        }
        if max_export_batch_size > max_queue_size {
            return Err(ConfigError::BatchLargerThanQueue {
                batch: max_export_batch_size,
                queue: max_queue_size,
            });
        }
        if export_interval_ms < 1 {
            return Err(ConfigError::InvalidExportInterval(export_interval_ms));
        }
        if export_timeout_ms < defaults::NO_EXPORT_TIMEOUT {
            return Err(ConfigError::InvalidExportTimeout(export_timeout_ms));
        }

        Ok(Self {
            max_queue_size,
            max_export_batch_size,
            export_interval_ms,
            export_timeout_ms,
        })
    }
}

impl Default for BatchExportProcessorOptions {
    fn default() -> Self {
        Self {
            max_queue_size: defaults::MAX_QUEUE_SIZE,
            max_export_batch_size: defaults::MAX_EXPORT_BATCH_SIZE,
            export_interval_ms: defaults::EXPORT_INTERVAL_MS,
            export_timeout_ms: defaults::EXPORT_TIMEOUT_MS,
        }
    }
}

impl BatchExportProcessorOptions {
    /// Builds options from the `OTEL_BSP_*` environment variables.
    ///
    /// Unset variables use the defaults. Values that do not parse are logged
    /// and replaced by the default; the combination is then validated as usual,
    /// so e.g. a batch size larger than the queue size is still an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder()
            .max_queue_size(env_or(env_vars::MAX_QUEUE_SIZE, defaults::MAX_QUEUE_SIZE))
            .max_export_batch_size(env_or(
                env_vars::MAX_EXPORT_BATCH_SIZE,
                defaults::MAX_EXPORT_BATCH_SIZE,
            ))
            .export_interval_ms(env_or(
                env_vars::EXPORT_INTERVAL,
                defaults::EXPORT_INTERVAL_MS,
            ))
            .export_timeout_ms(env_or(
                env_vars::EXPORT_TIMEOUT,
                defaults::EXPORT_TIMEOUT_MS,
            ))
            .build()
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub fn max_export_batch_size(&self) -> usize {
        self.max_export_batch_size
    }

    pub fn export_interval_ms(&self) -> u64 {
        self.export_interval_ms
    }

    pub fn export_timeout_ms(&self) -> i64 {
        self.export_timeout_ms
    }

    /// Interval between two scheduled exports.
    pub fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_ms)
    }

    /// Bound on a single export call, `None` when configured as -1.
    pub fn export_timeout(&self) -> Option<Duration> {
        u64::try_from(self.export_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                LOGGER.warn(format!(
                    "BatchExportProcessorOptions.from_env: invalid value for {}: {:?}, using default",
                    name, raw
                ));
                default
            }
        },
        Err(_) => default,
    }
}
