//! Flush/shutdown contract shared by all processors, and the pipeline that
//! owns them.
//!
//! A [`TelemetryPipeline`] plays the role of a tracer, meter or logger
//! provider: instrumentation emits records into it, it fans them out to its
//! processors, and it drives their flush and shutdown at the end of the
//! process.

use crate::error::ProcessorError;
use crate::logger::Logger;
use crate::record::TelemetryRecord;
use async_trait::async_trait;
use opentelemetry_sdk::Resource;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

static LOGGER: Logger = Logger::const_new("lifecycle");

/// Lifecycle of a processor: `Idle → Running → ShuttingDown → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    Idle = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessorState::Idle,
            1 => ProcessorState::Running,
            2 => ProcessorState::ShuttingDown,
            _ => ProcessorState::Stopped,
        }
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorState::Idle => write!(f, "idle"),
            ProcessorState::Running => write!(f, "running"),
            ProcessorState::ShuttingDown => write!(f, "shutting_down"),
            ProcessorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// [`ProcessorState`] stored in an atomic.
#[derive(Debug)]
pub(crate) struct AtomicProcessorState(AtomicU8);

impl AtomicProcessorState {
    pub(crate) fn new(state: ProcessorState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ProcessorState {
        ProcessorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ProcessorState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves from `current` to `new`; returns false if the state was not `current`.
    pub(crate) fn transition(&self, current: ProcessorState, new: ProcessorState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The contract every processor exposes to the pipeline that owns it.
///
/// `on_record` is called synchronously from instrumentation call sites and
/// must never block or panic. Both `force_flush` and `shutdown` honour the
/// cancellation token; `shutdown` is idempotent.
#[async_trait]
pub trait Processor: Send + Sync + fmt::Debug {
    /// Offers a record; returns whether it was accepted.
    fn on_record(&self, record: TelemetryRecord) -> bool;

    async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), ProcessorError>;

    async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), ProcessorError>;

    /// Replaces the resource attached to subsequent batches.
    fn set_resource(&self, _resource: &Resource) {}
}

/// Owns a set of processors and a resource, and fans records out to them.
///
/// ```no_run
/// use telemetry_batch_export::{BatchExportProcessor, InMemoryExporter, TelemetryPipeline};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), telemetry_batch_export::ProcessorError> {
/// let processor = BatchExportProcessor::builder()
///     .exporter(InMemoryExporter::default())
///     .build()?;
/// let pipeline = TelemetryPipeline::builder()
///     .with_processor(processor)
///     .build();
///
/// // ... pipeline.emit(record) from instrumentation ...
///
/// pipeline.shutdown(&CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TelemetryPipeline {
    processors: Vec<Box<dyn Processor>>,
    resource: Resource,
    is_shutdown: AtomicBool,
}

/// Builder for [`TelemetryPipeline`].
#[derive(Debug, Default)]
pub struct TelemetryPipelineBuilder {
    processors: Vec<Box<dyn Processor>>,
    resource: Option<Resource>,
}

impl TelemetryPipelineBuilder {
    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn build(self) -> TelemetryPipeline {
        let resource = self
            .resource
            .unwrap_or_else(|| Resource::builder_empty().build());
        for processor in &self.processors {
            processor.set_resource(&resource);
        }
        TelemetryPipeline {
            processors: self.processors,
            resource,
            is_shutdown: AtomicBool::new(false),
        }
    }
}

impl TelemetryPipeline {
    pub fn builder() -> TelemetryPipelineBuilder {
        TelemetryPipelineBuilder::default()
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Hands `record` to every processor.
    ///
    /// Returns how many processors accepted it. Records emitted after
    /// shutdown are ignored.
    pub fn emit(&self, record: TelemetryRecord) -> usize {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return 0;
        }
        let Some((last, rest)) = self.processors.split_last() else {
            return 0;
        };
        let mut accepted = 0;
        for processor in rest {
            if processor.on_record(record.clone()) {
                accepted += 1;
            }
        }
        if last.on_record(record) {
            accepted += 1;
        }
        accepted
    }

    /// Flushes every processor, returning the first error encountered.
    pub async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        let mut first_error = None;
        for processor in &self.processors {
            if let Err(err) = processor.force_flush(cancel).await {
                LOGGER.warn(format!(
                    "TelemetryPipeline.force_flush: processor {:?} failed: {}",
                    processor, err
                ));
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Shuts every processor down. Only the first call does any work.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for processor in &self.processors {
            if let Err(err) = processor.shutdown(cancel).await {
                LOGGER.warn(format!(
                    "TelemetryPipeline.shutdown: processor {:?} failed: {}",
                    processor, err
                ));
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
