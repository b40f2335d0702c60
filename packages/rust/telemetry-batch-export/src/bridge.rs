//! Adapter that plugs a [`BatchExportProcessor`] into the OpenTelemetry SDK.
//!
//! [`SpanProcessorBridge`] implements [`SpanProcessor`], so spans produced
//! through a regular `SdkTracerProvider` flow into the same queue and worker
//! as records emitted directly.
//!
//! ```no_run
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//! use std::sync::Arc;
//! use telemetry_batch_export::{BatchExportProcessor, InMemoryExporter, SpanProcessorBridge};
//!
//! # fn main() -> Result<(), telemetry_batch_export::ProcessorError> {
//! let processor = Arc::new(
//!     BatchExportProcessor::builder()
//!         .exporter(InMemoryExporter::default())
//!         .build()?,
//! );
//! let provider = SdkTracerProvider::builder()
//!     .with_span_processor(SpanProcessorBridge::new(processor))
//!     .build();
//! # Ok(())
//! # }
//! ```
//!
//! The SDK calls `force_flush` and `shutdown` synchronously, so the bridge
//! blocks on the processor with `futures_executor::block_on`. The export
//! worker runs on its own thread, which makes this safe from inside a tokio
//! runtime as well.

use crate::constants::defaults;
use crate::error::ProcessorError;
use crate::lifecycle::ProcessorState;
use crate::logger::Logger;
use crate::processor::BatchExportProcessor;
use crate::record::{InstrumentationScope, SpanRecord, SpanStatus, TelemetryRecord};
use opentelemetry::trace::Status;
use opentelemetry::Context;
use opentelemetry_sdk::{
    error::{OTelSdkError, OTelSdkResult},
    trace::{Span, SpanData, SpanProcessor},
    Resource,
};
use std::sync::Arc;
use std::time::Duration;

static LOGGER: Logger = Logger::const_new("bridge");

/// [`SpanProcessor`] that forwards finished, sampled spans to a
/// [`BatchExportProcessor`].
#[derive(Debug, Clone)]
pub struct SpanProcessorBridge {
    processor: Arc<BatchExportProcessor>,
    /// Fixed bound set through [`with_timeout`](Self::with_timeout).
    timeout: Option<Duration>,
}

impl SpanProcessorBridge {
    /// Wraps `processor`.
    ///
    /// Blocking flush and shutdown allow one export timeout per batch queued
    /// when the call starts (at least one). With the export timeout disabled,
    /// 30 seconds per batch is used instead.
    pub fn new(processor: Arc<BatchExportProcessor>) -> Self {
        Self {
            processor,
            timeout: None,
        }
    }

    /// Replaces the per-batch bound with a fixed bound on blocking flush and shutdown.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound for one blocking flush or shutdown.
    fn blocking_timeout(&self) -> Duration {
        if let Some(timeout) = self.timeout {
            return timeout;
        }
        let options = self.processor.options();
        let per_batch = options
            .export_timeout()
            .unwrap_or(Duration::from_millis(defaults::BLOCKING_FLUSH_TIMEOUT_MS));
        scaled_timeout(
            per_batch,
            self.processor.stats().queued,
            options.max_export_batch_size(),
        )
    }

    pub fn processor(&self) -> &Arc<BatchExportProcessor> {
        &self.processor
    }

    fn map_error(err: ProcessorError, timeout: Duration) -> OTelSdkError {
        match err {
            ProcessorError::Cancelled { .. } => OTelSdkError::Timeout(timeout),
            other => OTelSdkError::InternalFailure(other.to_string()),
        }
    }
}

/// One `per_batch` allowance for every batch needed by `queued` records, at least one.
fn scaled_timeout(per_batch: Duration, queued: usize, batch_size: usize) -> Duration {
    let batches = queued.div_ceil(batch_size.max(1)).max(1);
    per_batch.saturating_mul(u32::try_from(batches).unwrap_or(u32::MAX))
}

/// Converts a finished SDK span into a record.
fn span_to_record(span: SpanData) -> TelemetryRecord {
    let sdk_scope = &span.instrumentation_scope;
    let mut scope = InstrumentationScope::builder(sdk_scope.name().to_string())
        .attributes(sdk_scope.attributes().cloned());
    if let Some(version) = sdk_scope.version() {
        scope = scope.version(version.to_string());
    }

    let status = match span.status {
        Status::Unset => SpanStatus::Unset,
        Status::Ok => SpanStatus::Ok,
        Status::Error { description } => SpanStatus::Error { description },
    };

    TelemetryRecord::span(
        Arc::new(scope.build()),
        SpanRecord {
            trace_id: span.span_context.trace_id(),
            span_id: span.span_context.span_id(),
            parent_span_id: span.parent_span_id,
            name: span.name,
            kind: span.span_kind,
            start_time: span.start_time,
            end_time: span.end_time,
            attributes: span.attributes,
            status,
        },
    )
}

impl SpanProcessor for SpanProcessorBridge {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // No-op, as we only process spans on end
    }

    fn on_end(&self, span: SpanData) {
        // Skip unsampled spans
        if !span.span_context.is_sampled() {
            return;
        }
        self.processor.on_record(span_to_record(span));
    }

    fn force_flush(&self) -> OTelSdkResult {
        LOGGER.debug("SpanProcessorBridge.force_flush: flushing spans");
        let timeout = self.blocking_timeout();
        futures_executor::block_on(self.processor.force_flush_with_timeout(timeout))
            .map_err(|err| Self::map_error(err, timeout))
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.processor.state() != ProcessorState::Running {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        let timeout = self.blocking_timeout();
        futures_executor::block_on(self.processor.shutdown_with_timeout(timeout))
            .map_err(|err| Self::map_error(err, timeout))
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.processor.set_resource(resource);
    }
}
