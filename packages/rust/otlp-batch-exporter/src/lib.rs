//! OTLP/JSON exporters for `telemetry-batch-export`.
//!
//! This crate provides [`Exporter`](telemetry_batch_export::Exporter)
//! implementations that serialize batches as OTLP/JSON:
//!
//! - [`OtlpStdoutExporter`] writes one line per signal kind to stdout, either
//!   as plain JSON or as a gzip-compressed, base64-encoded envelope. This
//!   suits environments where a log forwarder ships stdout to a collector.
//! - [`OtlpHttpExporter`] posts each payload to an OTLP/HTTP collector at
//!   `<endpoint>/v1/traces`, `/v1/logs` or `/v1/metrics`.
//!
//! Both render through [`OtlpJsonWriter`], a reusable
//! [`BatchWriter`](telemetry_batch_export::BatchWriter) that keeps its
//! buffers between batches.
//!
//! # Example
//!
//! ```rust,no_run
//! use otlp_batch_exporter::OtlpStdoutExporter;
//! use telemetry_batch_export::{BatchExportProcessor, BatchExportProcessorOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = BatchExportProcessor::builder()
//!         .exporter(OtlpStdoutExporter::default())
//!         .options(BatchExportProcessorOptions::from_env()?)
//!         .build()?;
//!
//!     // processor.on_record(record) from instrumentation call sites
//!
//!     processor.shutdown(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTLP_BATCH_EXPORTER_COMPRESSION_LEVEL`: gzip level (0-9, default 6)
//! - `OTEL_SERVICE_NAME`: `source` field of the stdout envelope
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector base URL (default `http://localhost:4318`)
//! - `OTEL_EXPORTER_OTLP_HEADERS`: extra request headers as `key=value,key=value`

mod compression;
pub mod constants;
pub mod http;
pub mod json;
pub mod stdout;

pub use http::{parse_headers, BuildError, OtlpHttpExporter};
pub use json::{signal_path, OtlpJsonWriter};
pub use stdout::OtlpStdoutExporter;

#[cfg(doctest)]
#[macro_use]
extern crate doc_comment;

#[cfg(doctest)]
use doc_comment::doctest;

#[cfg(doctest)]
doctest!("../README.md", readme);
