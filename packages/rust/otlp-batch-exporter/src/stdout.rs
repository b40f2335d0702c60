//! Exporter that writes OTLP/JSON payloads to stdout.
//!
//! Each payload is written as a single line. By default the line is the plain
//! OTLP/JSON request body. With gzip enabled, the body is compressed, base64
//! encoded and wrapped in an envelope that a log forwarder can unpack:
//!
//! ```json
//! {
//!   "__otel_otlp_stdout": "otlp-batch-exporter@0.1.0",
//!   "source": "my-service",
//!   "endpoint": "/v1/traces",
//!   "method": "POST",
//!   "content-type": "application/json",
//!   "content-encoding": "gzip",
//!   "base64": true,
//!   "payload": "H4sIAAAA..."
//! }
//! ```

use crate::compression::gzip;
use crate::constants::{defaults, env_vars, headers, VERSION_PREFIX};
use crate::json::{signal_path, OtlpJsonWriter};
use base64::{engine::general_purpose, Engine as _};
use bon::bon;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::env;
use std::io::Write;
use std::sync::Arc;
use telemetry_batch_export::{Batch, ExportError, ExportResult, Exporter};

#[cfg(test)]
use std::sync::Mutex;

/// Destination for output lines.
trait Output: Send + Sync + std::fmt::Debug {
    fn write_line(&self, line: &str) -> Result<(), ExportError>;
}

/// Standard output implementation that writes to stdout
#[derive(Debug, Default)]
struct StdOutput;

impl Output for StdOutput {
    fn write_line(&self, line: &str) -> Result<(), ExportError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).map_err(|e| ExportError::Transport(e.to_string()))
    }
}

/// Test output implementation that captures to a buffer
#[cfg(test)]
#[derive(Debug, Default)]
struct TestOutput {
    buffer: Mutex<Vec<String>>,
}

#[cfg(test)]
impl TestOutput {
    fn get_output(&self) -> Vec<String> {
        self.buffer.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Output for TestOutput {
    fn write_line(&self, line: &str) -> Result<(), ExportError> {
        self.buffer.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "__otel_otlp_stdout")]
    version: &'a str,
    source: &'a str,
    endpoint: &'static str,
    method: &'static str,
    #[serde(rename = "content-type")]
    content_type: &'static str,
    #[serde(rename = "content-encoding")]
    content_encoding: &'static str,
    base64: bool,
    payload: String,
}

/// Writes each batch to stdout as OTLP/JSON lines, one per signal kind.
///
/// ```rust,no_run
/// use otlp_batch_exporter::OtlpStdoutExporter;
/// use telemetry_batch_export::BatchExportProcessor;
///
/// let processor = BatchExportProcessor::builder()
///     .exporter(OtlpStdoutExporter::builder().gzip(true).build())
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct OtlpStdoutExporter {
    output: Arc<dyn Output>,
    /// Compression level when gzip output is enabled
    compression_level: Option<u8>,
    source: String,
    version: String,
}

impl Default for OtlpStdoutExporter {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon]
impl OtlpStdoutExporter {
    /// Creates a new exporter.
    ///
    /// `compression_level` falls back to `OTLP_BATCH_EXPORTER_COMPRESSION_LEVEL`
    /// and then to 6; values above 9 are capped. `source` falls back to
    /// `OTEL_SERVICE_NAME`.
    #[builder]
    pub fn new(
        #[builder(default)] gzip: bool,
        compression_level: Option<u8>,
        source: Option<String>,
    ) -> Self {
        let compression_level = gzip.then(|| {
            compression_level
                .or_else(|| {
                    env::var(env_vars::COMPRESSION_LEVEL)
                        .ok()
                        .and_then(|value| value.parse().ok())
                })
                .unwrap_or(defaults::COMPRESSION_LEVEL)
                .min(9)
        });
        let source = source
            .or_else(|| env::var(env_vars::SERVICE_NAME).ok())
            .unwrap_or_else(|| defaults::SERVICE_NAME.to_string());

        Self {
            output: Arc::new(StdOutput),
            compression_level,
            source,
            version: format!("{}{}", VERSION_PREFIX, env!("CARGO_PKG_VERSION")),
        }
    }
}

impl OtlpStdoutExporter {
    #[cfg(test)]
    fn with_test_output(gzip: bool) -> (Self, Arc<TestOutput>) {
        let output = Arc::new(TestOutput::default());
        let mut exporter = Self::builder()
            .gzip(gzip)
            .compression_level(6)
            .source("test-service".to_string())
            .build();
        exporter.output = output.clone() as Arc<dyn Output>;
        (exporter, output)
    }

    fn write_payloads(&self, writer: &mut OtlpJsonWriter) -> ExportResult {
        writer.finish()?;
        for (kind, payload) in writer.payloads() {
            match self.compression_level {
                None => {
                    let line = std::str::from_utf8(payload)
                        .map_err(|e| ExportError::Serialization(e.to_string()))?;
                    self.output.write_line(line)?;
                }
                Some(level) => {
                    let compressed = gzip(payload, level)
                        .map_err(|e| ExportError::Serialization(e.to_string()))?;
                    let envelope = Envelope {
                        version: &self.version,
                        source: &self.source,
                        endpoint: signal_path(kind),
                        method: "POST",
                        content_type: headers::CONTENT_TYPE_JSON,
                        content_encoding: headers::ENCODING_GZIP,
                        base64: true,
                        payload: general_purpose::STANDARD.encode(compressed),
                    };
                    let line = serde_json::to_string(&envelope)
                        .map_err(|e| ExportError::Serialization(e.to_string()))?;
                    self.output.write_line(&line)?;
                }
            }
        }
        Ok(())
    }
}

impl Exporter for OtlpStdoutExporter {
    type Writer = OtlpJsonWriter;

    fn new_writer(&self) -> Self::Writer {
        OtlpJsonWriter::new()
    }

    fn export<'a>(
        &'a mut self,
        batch: Batch<'a>,
        writer: &'a mut Self::Writer,
    ) -> BoxFuture<'a, ExportResult> {
        // Do all work synchronously
        let result = if batch.write_to(writer) {
            self.write_payloads(writer)
        } else {
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}
