//! Exporter that posts OTLP/JSON payloads to an OTLP/HTTP collector.

use crate::compression::gzip;
use crate::constants::{defaults, env_vars, headers};
use crate::json::{signal_path, OtlpJsonWriter};
use bon::bon;
use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client as ReqwestClient;
use std::env;
use std::str::FromStr;
use telemetry_batch_export::logger::Logger;
use telemetry_batch_export::{Batch, ExportError, ExportResult, Exporter, SignalKind};
use thiserror::Error;

static LOGGER: Logger = Logger::const_new("http");

/// Longest response body quoted in a rejection error.
const MAX_ERROR_BODY: usize = 512;

/// Errors raised while configuring an [`OtlpHttpExporter`].
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Parses `key=value` pairs into a header map.
///
/// Malformed entries without `=` are skipped with a warning.
pub fn parse_headers<'a>(
    pairs: impl IntoIterator<Item = &'a str>,
) -> Result<HeaderMap, BuildError> {
    let mut header_map = HeaderMap::new();
    for pair in pairs {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((name, value)) => {
                let name = name.trim();
                let header_name = HeaderName::from_str(name)
                    .map_err(|_| BuildError::InvalidHeaderName(name.to_string()))?;
                let header_value = HeaderValue::from_str(value.trim())
                    .map_err(|_| BuildError::InvalidHeaderValue(name.to_string()))?;
                header_map.insert(header_name, header_value);
            }
            None => LOGGER.warn(format!(
                "parse_headers: ignoring malformed OTLP header (expected key=value): {}",
                pair
            )),
        }
    }
    Ok(header_map)
}

/// Posts each batch to `<endpoint>/v1/{traces,logs,metrics}` as OTLP/JSON.
///
/// Requests are sent on the export worker's runtime; the processor's export
/// timeout bounds each batch, so the client itself needs no timeout.
///
/// ```rust,no_run
/// use otlp_batch_exporter::OtlpHttpExporter;
/// use telemetry_batch_export::BatchExportProcessor;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let exporter = OtlpHttpExporter::builder()
///     .endpoint("https://collector.example.com:4318".to_string())
///     .headers(vec![("x-api-key".to_string(), "secret".to_string())])
///     .gzip(true)
///     .build()?;
/// let processor = BatchExportProcessor::builder().exporter(exporter).build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OtlpHttpExporter {
    client: ReqwestClient,
    endpoint: String,
    headers: HeaderMap,
    compression_level: Option<u8>,
}

#[bon]
impl OtlpHttpExporter {
    /// Creates a new exporter.
    ///
    /// `endpoint` falls back to `OTEL_EXPORTER_OTLP_ENDPOINT` and then to
    /// `http://localhost:4318`. When `headers` is empty, headers are read from
    /// `OTEL_EXPORTER_OTLP_HEADERS`.
    #[builder]
    pub fn new(
        endpoint: Option<String>,
        #[builder(default)] headers: Vec<(String, String)>,
        #[builder(default)] gzip: bool,
        compression_level: Option<u8>,
        client: Option<ReqwestClient>,
    ) -> Result<Self, BuildError> {
        let endpoint = endpoint
            .or_else(|| env::var(env_vars::OTLP_ENDPOINT).ok())
            .unwrap_or_else(|| defaults::ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        let header_map = if headers.is_empty() {
            let from_env = env::var(env_vars::OTLP_HEADERS).unwrap_or_default();
            parse_headers(from_env.split(','))?
        } else {
            let pairs: Vec<String> = headers
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            parse_headers(pairs.iter().map(String::as_str))?
        };

        let client = match client {
            Some(client) => client,
            None => ReqwestClient::builder().build()?,
        };

        Ok(Self {
            client,
            endpoint,
            headers: header_map,
            compression_level: gzip
                .then(|| compression_level.unwrap_or(defaults::COMPRESSION_LEVEL)),
        })
    }
}

impl OtlpHttpExporter {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, kind: SignalKind, payload: &[u8]) -> ExportResult {
        let url = format!("{}{}", self.endpoint, signal_path(kind));

        let mut request = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, headers::CONTENT_TYPE_JSON);
        request = match self.compression_level {
            Some(level) => {
                let body = gzip(payload, level)
                    .map_err(|e| ExportError::Serialization(e.to_string()))?;
                request
                    .header(CONTENT_ENCODING, headers::ENCODING_GZIP)
                    .body(body)
            }
            None => request.body(payload.to_vec()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            LOGGER.debug(format!(
                "OtlpHttpExporter.send: {} payload accepted by {}",
                kind, url
            ));
            return Ok(());
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Err(ExportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

impl Exporter for OtlpHttpExporter {
    type Writer = OtlpJsonWriter;

    fn new_writer(&self) -> Self::Writer {
        OtlpJsonWriter::new()
    }

    fn export<'a>(
        &'a mut self,
        batch: Batch<'a>,
        writer: &'a mut Self::Writer,
    ) -> BoxFuture<'a, ExportResult> {
        Box::pin(async move {
            if !batch.write_to(writer) {
                return Ok(());
            }
            writer.finish()?;
            // One request per signal kind; the first failure fails the batch
            for (kind, payload) in writer.payloads() {
                self.send(kind, payload).await?;
            }
            Ok(())
        })
    }
}
