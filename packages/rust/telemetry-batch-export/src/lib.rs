//! Batched, non-blocking export of telemetry records.
//!
//! This crate sits between instrumentation call sites and telemetry backends.
//! Producers hand finished spans, log records and metric points to a
//! [`BatchExportProcessor`]; it queues them in a bounded buffer and a
//! dedicated worker thread exports them in batches through an [`Exporter`].
//!
//! # Features
//!
//! - **Never blocks producers**: a full queue drops the record and counts it
//! - **Bounded memory**: queue capacity and batch size are fixed up front
//! - **Fault isolation**: export errors, timeouts and panics are logged and
//!   the batch is discarded; producers never see them
//! - **Cancellable lifecycle**: `force_flush` and `shutdown` honour a
//!   [`CancellationToken`](tokio_util::sync::CancellationToken) or a timeout
//! - **Zero-copy serialization protocol**: exporters receive a borrowed
//!   [`Batch`] and drive a reusable [`BatchWriter`] grouped by
//!   instrumentation scope
//!
//! # Architecture
//!
//! - [`record`]: records and instrumentation scopes
//! - [`batch`]: batches and the writer protocol
//! - [`queue`]: the bounded drop-on-full queue
//! - [`exporter`]: the exporter contract and an in-memory exporter
//! - [`processor`]: the batch export processor and its worker
//! - [`lifecycle`]: the processor contract and the owning pipeline
//! - [`bridge`]: adapter for the OpenTelemetry SDK tracer provider
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::SystemTime;
//! use telemetry_batch_export::{
//!     BatchExportProcessor, BatchExportProcessorOptions, InMemoryExporter, InstrumentationScope,
//!     LogRecord, Severity, TelemetryPipeline, TelemetryRecord,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = BatchExportProcessor::builder()
//!         .exporter(InMemoryExporter::default())
//!         .options(BatchExportProcessorOptions::from_env()?)
//!         .build()?;
//!     let pipeline = TelemetryPipeline::builder().with_processor(processor).build();
//!
//!     let scope = Arc::new(InstrumentationScope::builder("my-service").build());
//!     pipeline.emit(TelemetryRecord::log(
//!         scope,
//!         LogRecord {
//!             timestamp: SystemTime::now(),
//!             severity: Severity::Info,
//!             body: "order created".into(),
//!             attributes: Vec::new(),
//!             trace_id: None,
//!             span_id: None,
//!         },
//!     ));
//!
//!     pipeline.shutdown(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Read by [`BatchExportProcessorOptions::from_env`]:
//!
//! - `OTEL_BSP_MAX_QUEUE_SIZE`: queue capacity (default 2048)
//! - `OTEL_BSP_MAX_EXPORT_BATCH_SIZE`: records per export call (default 512)
//! - `OTEL_BSP_SCHEDULE_DELAY`: export interval in milliseconds (default 5000)
//! - `OTEL_BSP_EXPORT_TIMEOUT`: export timeout in milliseconds, `-1` for none
//!   (default 30000)
//!
//! Internal diagnostics are filtered by `BATCH_EXPORT_LOG_LEVEL`, falling back
//! to `LOG_LEVEL` (`none`, `error`, `warn`, `info`, `debug`; default `info`).

pub mod batch;
pub mod bridge;
pub mod constants;
pub mod error;
pub mod exporter;
pub mod lifecycle;
pub mod logger;
pub mod options;
pub mod processor;
pub mod queue;
pub mod record;

pub use batch::{Batch, BatchWriter};
pub use bridge::SpanProcessorBridge;
pub use error::{ConfigError, ExportError, ProcessorError};
pub use exporter::{CollectingWriter, ExportResult, Exporter, InMemoryExporter};
pub use lifecycle::{Processor, ProcessorState, TelemetryPipeline, TelemetryPipelineBuilder};
pub use options::BatchExportProcessorOptions;
pub use processor::{BatchExportProcessor, ProcessorStats};
pub use queue::BoundedQueue;
pub use record::{
    InstrumentationScope, InstrumentationScopeBuilder, LogRecord, MetricPoint, MetricValue,
    Severity, Signal, SignalKind, SpanRecord, SpanStatus, TelemetryRecord,
};

#[cfg(doctest)]
#[macro_use]
extern crate doc_comment;

#[cfg(doctest)]
use doc_comment::doctest;

#[cfg(doctest)]
doctest!("../README.md", readme);
