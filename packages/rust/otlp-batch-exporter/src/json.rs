//! OTLP/JSON rendering of batches.
//!
//! [`OtlpJsonWriter`] implements [`BatchWriter`] and renders one OTLP/JSON
//! request body per signal kind present in the batch:
//!
//! ```json
//! {"resourceSpans":[{"resource":{"attributes":[...]},"scopeSpans":[
//!   {"scope":{"name":"http","version":"1.0"},"spans":[{...},{...}]}
//! ]}]}
//! ```
//!
//! Logs and metrics use `resourceLogs`/`scopeLogs`/`logRecords` and
//! `resourceMetrics`/`scopeMetrics`/`metrics`. Field names are camelCase, ids
//! are lowercase hex, 64-bit integers and nanosecond timestamps are strings,
//! and enums are numeric, as the OTLP/JSON encoding requires.
//!
//! The writer keeps its buffers between batches and only clears them at
//! `begin_batch`, so steady-state export does not allocate payload storage.

use crate::constants::paths;
use opentelemetry::trace::{SpanId, SpanKind, TraceId};
use opentelemetry::{Array, KeyValue, Value};
use opentelemetry_sdk::Resource;
use serde::Serialize;
use std::borrow::Cow;
use std::time::SystemTime;
use telemetry_batch_export::{
    BatchWriter, ExportError, InstrumentationScope, LogRecord, MetricPoint, MetricValue, Signal,
    SignalKind, SpanRecord, SpanStatus, TelemetryRecord,
};

const KINDS: [SignalKind; 3] = [SignalKind::Span, SignalKind::Log, SignalKind::Metric];

fn slot(kind: SignalKind) -> usize {
    match kind {
        SignalKind::Span => 0,
        SignalKind::Log => 1,
        SignalKind::Metric => 2,
    }
}

/// JSON keys of the resource, scope and item arrays for a signal kind.
fn layout(kind: SignalKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        SignalKind::Span => ("resourceSpans", "scopeSpans", "spans"),
        SignalKind::Log => ("resourceLogs", "scopeLogs", "logRecords"),
        SignalKind::Metric => ("resourceMetrics", "scopeMetrics", "metrics"),
    }
}

/// OTLP/HTTP path a payload of this kind is posted to.
pub fn signal_path(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Span => paths::TRACES,
        SignalKind::Log => paths::LOGS,
        SignalKind::Metric => paths::METRICS,
    }
}

#[derive(Debug, Default)]
struct Payload {
    buf: Vec<u8>,
    started: bool,
    scopes: usize,
    scope_open: bool,
    items_in_scope: usize,
}

impl Payload {
    fn reset(&mut self) {
        self.buf.clear();
        self.started = false;
        self.scopes = 0;
        self.scope_open = false;
        self.items_in_scope = 0;
    }

    fn push(&mut self, parts: &[&[u8]]) {
        for part in parts {
            self.buf.extend_from_slice(part);
        }
    }
}

/// Reusable [`BatchWriter`] producing OTLP/JSON request bodies.
#[derive(Debug, Default)]
pub struct OtlpJsonWriter {
    payloads: [Payload; 3],
    resource: Vec<u8>,
    scope: Vec<u8>,
    error: Option<String>,
}

impl OtlpJsonWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads rendered by the last batch, in span, log, metric order.
    ///
    /// Kinds absent from the batch are skipped.
    pub fn payloads(&self) -> impl Iterator<Item = (SignalKind, &[u8])> + '_ {
        KINDS.iter().filter_map(move |kind| {
            let payload = &self.payloads[slot(*kind)];
            payload.started.then_some((*kind, payload.buf.as_slice()))
        })
    }

    /// Fails if anything in the last batch could not be serialized.
    pub fn finish(&mut self) -> Result<(), ExportError> {
        match self.error.take() {
            Some(message) => Err(ExportError::Serialization(message)),
            None => Ok(()),
        }
    }

    fn record_error(&mut self, err: serde_json::Error) {
        self.error.get_or_insert_with(|| err.to_string());
    }
}

impl BatchWriter for OtlpJsonWriter {
    fn begin_batch(&mut self, resource: &Resource) {
        for payload in &mut self.payloads {
            payload.reset();
        }
        self.error = None;
        self.resource.clear();

        let attributes: Vec<AttributeJson<'_>> = resource
            .iter()
            .map(|(key, value)| AttributeJson {
                key: key.as_str(),
                value: any_value(value),
            })
            .collect();
        if let Err(err) = serde_json::to_writer(&mut self.resource, &ResourceJson { attributes }) {
            self.record_error(err);
        }
    }

    fn begin_instrumentation_scope(&mut self, scope: &InstrumentationScope) {
        self.scope.clear();
        let json = ScopeJson {
            name: scope.name(),
            version: scope.version(),
            attributes: attributes(scope.attributes()),
        };
        if let Err(err) = serde_json::to_writer(&mut self.scope, &json) {
            self.record_error(err);
        }
    }

    fn write(&mut self, record: &TelemetryRecord) {
        let kind = record.kind();
        let (resource_key, scope_key, items_key) = layout(kind);
        let payload = &mut self.payloads[slot(kind)];

        if !payload.started {
            payload.push(&[
                b"{\"",
                resource_key.as_bytes(),
                b"\":[{\"resource\":",
                &self.resource,
                b",\"",
                scope_key.as_bytes(),
                b"\":[",
            ]);
            payload.started = true;
        }
        if !payload.scope_open {
            if payload.scopes > 0 {
                payload.push(&[b","]);
            }
            payload.push(&[
                b"{\"scope\":",
                &self.scope,
                b",\"",
                items_key.as_bytes(),
                b"\":[",
            ]);
            payload.scope_open = true;
            payload.scopes += 1;
            payload.items_in_scope = 0;
        }
        if payload.items_in_scope > 0 {
            payload.push(&[b","]);
        }
        payload.items_in_scope += 1;

        let result = match record.payload() {
            Signal::Span(span) => serde_json::to_writer(&mut payload.buf, &SpanJson::from(span)),
            Signal::Log(log) => serde_json::to_writer(&mut payload.buf, &LogJson::from(log)),
            Signal::Metric(point) => {
                serde_json::to_writer(&mut payload.buf, &MetricJson::from(point))
            }
        };
        if let Err(err) = result {
            self.record_error(err);
        }
    }

    fn end_instrumentation_scope(&mut self) {
        for payload in &mut self.payloads {
            if payload.scope_open {
                payload.push(&[b"]}"]);
                payload.scope_open = false;
            }
        }
    }

    fn end_batch(&mut self) {
        for payload in &mut self.payloads {
            if payload.started {
                payload.push(&[b"]}]}"]);
            }
        }
    }
}

fn unix_nanos(time: SystemTime) -> String {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0)
        .to_string()
}

fn trace_id_hex(id: TraceId) -> String {
    format!("{:032x}", id)
}

fn span_id_hex(id: SpanId) -> String {
    format!("{:016x}", id)
}

fn span_kind_number(kind: &SpanKind) -> i32 {
    match kind {
        SpanKind::Internal => 1,
        SpanKind::Server => 2,
        SpanKind::Client => 3,
        SpanKind::Producer => 4,
        SpanKind::Consumer => 5,
    }
}

#[derive(Serialize)]
enum AnyValueJson<'a> {
    #[serde(rename = "stringValue")]
    String(Cow<'a, str>),
    #[serde(rename = "boolValue")]
    Bool(bool),
    #[serde(rename = "intValue")]
    Int(String),
    #[serde(rename = "doubleValue")]
    Double(f64),
    #[serde(rename = "arrayValue")]
    Array { values: Vec<AnyValueJson<'a>> },
}

fn any_value(value: &Value) -> AnyValueJson<'_> {
    match value {
        Value::Bool(b) => AnyValueJson::Bool(*b),
        Value::I64(i) => AnyValueJson::Int(i.to_string()),
        Value::F64(f) => AnyValueJson::Double(*f),
        Value::String(s) => AnyValueJson::String(Cow::Borrowed(s.as_str())),
        Value::Array(array) => AnyValueJson::Array {
            values: array_values(array),
        },
        #[allow(unreachable_patterns)]
        other => AnyValueJson::String(Cow::Owned(other.to_string())),
    }
}

fn array_values(array: &Array) -> Vec<AnyValueJson<'_>> {
    match array {
        Array::Bool(values) => values.iter().map(|b| AnyValueJson::Bool(*b)).collect(),
        Array::I64(values) => values
            .iter()
            .map(|i| AnyValueJson::Int(i.to_string()))
            .collect(),
        Array::F64(values) => values.iter().map(|f| AnyValueJson::Double(*f)).collect(),
        Array::String(values) => values
            .iter()
            .map(|s| AnyValueJson::String(Cow::Borrowed(s.as_str())))
            .collect(),
        #[allow(unreachable_patterns)]
        other => vec![AnyValueJson::String(Cow::Owned(other.to_string()))],
    }
}

#[derive(Serialize)]
struct AttributeJson<'a> {
    key: &'a str,
    value: AnyValueJson<'a>,
}

fn attributes(attributes: &[KeyValue]) -> Vec<AttributeJson<'_>> {
    attributes
        .iter()
        .map(|kv| AttributeJson {
            key: kv.key.as_str(),
            value: any_value(&kv.value),
        })
        .collect()
}

#[derive(Serialize)]
struct ResourceJson<'a> {
    attributes: Vec<AttributeJson<'a>>,
}

#[derive(Serialize)]
struct ScopeJson<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<AttributeJson<'a>>,
}

#[derive(Serialize)]
struct StatusJson<'a> {
    code: i32,
    #[serde(skip_serializing_if = "str::is_empty")]
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpanJson<'a> {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    name: &'a str,
    kind: i32,
    start_time_unix_nano: String,
    end_time_unix_nano: String,
    attributes: Vec<AttributeJson<'a>>,
    status: StatusJson<'a>,
}

impl<'a> From<&'a SpanRecord> for SpanJson<'a> {
    fn from(span: &'a SpanRecord) -> Self {
        let status = match &span.status {
            SpanStatus::Unset => StatusJson {
                code: 0,
                message: "",
            },
            SpanStatus::Ok => StatusJson {
                code: 1,
                message: "",
            },
            SpanStatus::Error { description } => StatusJson {
                code: 2,
                message: description,
            },
        };
        Self {
            trace_id: trace_id_hex(span.trace_id),
            span_id: span_id_hex(span.span_id),
            parent_span_id: (span.parent_span_id != SpanId::INVALID)
                .then(|| span_id_hex(span.parent_span_id)),
            name: &span.name,
            kind: span_kind_number(&span.kind),
            start_time_unix_nano: unix_nanos(span.start_time),
            end_time_unix_nano: unix_nanos(span.end_time),
            attributes: attributes(&span.attributes),
            status,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogJson<'a> {
    time_unix_nano: String,
    severity_number: i32,
    severity_text: &'static str,
    body: AnyValueJson<'a>,
    attributes: Vec<AttributeJson<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
}

impl<'a> From<&'a LogRecord> for LogJson<'a> {
    fn from(log: &'a LogRecord) -> Self {
        Self {
            time_unix_nano: unix_nanos(log.timestamp),
            severity_number: log.severity.number(),
            severity_text: log.severity.name(),
            body: AnyValueJson::String(Cow::Borrowed(&log.body)),
            attributes: attributes(&log.attributes),
            trace_id: log.trace_id.map(trace_id_hex),
            span_id: log.span_id.map(span_id_hex),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NumberDataPointJson<'a> {
    time_unix_nano: String,
    as_double: f64,
    attributes: Vec<AttributeJson<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SumJson<'a> {
    data_points: Vec<NumberDataPointJson<'a>>,
    /// Always cumulative.
    aggregation_temporality: i32,
    is_monotonic: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GaugeJson<'a> {
    data_points: Vec<NumberDataPointJson<'a>>,
}

#[derive(Serialize)]
struct MetricJson<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    unit: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sum: Option<SumJson<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gauge: Option<GaugeJson<'a>>,
}

impl<'a> From<&'a MetricPoint> for MetricJson<'a> {
    fn from(point: &'a MetricPoint) -> Self {
        let data_point = |value: f64| NumberDataPointJson {
            time_unix_nano: unix_nanos(point.timestamp),
            as_double: value,
            attributes: attributes(&point.attributes),
        };
        let (sum, gauge) = match point.value {
            MetricValue::Sum { value, monotonic } => (
                Some(SumJson {
                    data_points: vec![data_point(value)],
                    aggregation_temporality: 2,
                    is_monotonic: monotonic,
                }),
                None,
            ),
            MetricValue::Gauge(value) => (
                None,
                Some(GaugeJson {
                    data_points: vec![data_point(value)],
                }),
            ),
        };
        Self {
            name: &point.name,
            description: &point.description,
            unit: &point.unit,
            sum,
            gauge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as Json;
    use std::sync::Arc;
    use std::time::Duration;
    use telemetry_batch_export::{Batch, Severity};

    fn scope(name: &'static str) -> Arc<InstrumentationScope> {
        Arc::new(
            InstrumentationScope::builder(name)
                .version("1.0.0")
                .attributes(vec![KeyValue::new("lib.kind", "http")])
                .build(),
        )
    }

    fn span(scope: &Arc<InstrumentationScope>, name: &'static str) -> TelemetryRecord {
        TelemetryRecord::span(
            scope.clone(),
            SpanRecord {
                trace_id: TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
                span_id: SpanId::from_hex("00f067aa0ba902b7").unwrap(),
                parent_span_id: SpanId::from_hex("0000000000000001").unwrap(),
                name: name.into(),
                kind: SpanKind::Client,
                start_time: SystemTime::UNIX_EPOCH + Duration::from_nanos(1_500),
                end_time: SystemTime::UNIX_EPOCH + Duration::from_nanos(2_500),
                attributes: vec![
                    KeyValue::new("http.status_code", 200_i64),
                    KeyValue::new("retry", false),
                    KeyValue::new(
                        "tags",
                        Value::Array(Array::String(vec!["a".into(), "b".into()])),
                    ),
                ],
                status: SpanStatus::Error {
                    description: "timeout".into(),
                },
            },
        )
    }

    fn log(scope: &Arc<InstrumentationScope>) -> TelemetryRecord {
        TelemetryRecord::log(
            scope.clone(),
            LogRecord {
                timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1),
                severity: Severity::Error,
                body: "connection reset".into(),
                attributes: Vec::new(),
                trace_id: Some(TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()),
                span_id: None,
            },
        )
    }

    fn metric(scope: &Arc<InstrumentationScope>) -> TelemetryRecord {
        TelemetryRecord::metric(
            scope.clone(),
            MetricPoint {
                name: "http.requests".into(),
                description: "".into(),
                unit: "{request}".into(),
                timestamp: SystemTime::UNIX_EPOCH,
                value: MetricValue::Sum {
                    value: 3.0,
                    monotonic: true,
                },
                attributes: Vec::new(),
            },
        )
    }

    fn render(records: &[TelemetryRecord]) -> (OtlpJsonWriter, Vec<(SignalKind, Json)>) {
        let resource = Resource::builder_empty()
            .with_service_name("orders")
            .build();
        let mut writer = OtlpJsonWriter::new();
        Batch::new(records, &resource).write_to(&mut writer);
        writer.finish().unwrap();
        let parsed = writer
            .payloads()
            .map(|(kind, bytes)| (kind, serde_json::from_slice(bytes).unwrap()))
            .collect();
        (writer, parsed)
    }

    #[test]
    fn test_span_payload_shape() {
        let http = scope("http");
        let (_, payloads) = render(&[span(&http, "GET /a"), span(&http, "GET /b")]);

        assert_eq!(payloads.len(), 1);
        let (kind, json) = &payloads[0];
        assert_eq!(*kind, SignalKind::Span);

        let resource_spans = json["resourceSpans"].as_array().unwrap();
        assert_eq!(resource_spans.len(), 1);
        assert_eq!(
            resource_spans[0]["resource"]["attributes"][0]["value"]["stringValue"],
            "orders"
        );

        let scope_spans = resource_spans[0]["scopeSpans"].as_array().unwrap();
        assert_eq!(scope_spans.len(), 1);
        assert_eq!(scope_spans[0]["scope"]["name"], "http");
        assert_eq!(scope_spans[0]["scope"]["version"], "1.0.0");

        let spans = scope_spans[0]["spans"].as_array().unwrap();
        assert_eq!(spans.len(), 2);
        let first = &spans[0];
        assert_eq!(first["traceId"], "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(first["spanId"], "00f067aa0ba902b7");
        assert_eq!(first["parentSpanId"], "0000000000000001");
        assert_eq!(first["kind"], 3);
        assert_eq!(first["startTimeUnixNano"], "1500");
        assert_eq!(first["endTimeUnixNano"], "2500");
        assert_eq!(first["status"]["code"], 2);
        assert_eq!(first["status"]["message"], "timeout");
        assert_eq!(first["attributes"][0]["value"]["intValue"], "200");
        assert_eq!(first["attributes"][1]["value"]["boolValue"], false);
        assert_eq!(
            first["attributes"][2]["value"]["arrayValue"]["values"][1]["stringValue"],
            "b"
        );
    }

    #[test]
    fn test_one_payload_per_signal_kind() {
        let http = scope("http");
        let db = scope("db");
        let (_, payloads) = render(&[metric(&db), log(&http), span(&http, "q"), log(&db)]);

        let kinds: Vec<SignalKind> = payloads.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec![SignalKind::Span, SignalKind::Log, SignalKind::Metric]);

        // Both scopes carry logs, in first-seen scope order
        let logs = &payloads[1].1["resourceLogs"][0]["scopeLogs"];
        assert_eq!(logs.as_array().unwrap().len(), 2);
        assert_eq!(logs[0]["scope"]["name"], "db");
        assert_eq!(logs[1]["scope"]["name"], "http");
        let record = &logs[1]["logRecords"][0];
        assert_eq!(record["severityNumber"], 17);
        assert_eq!(record["severityText"], "ERROR");
        assert_eq!(record["body"]["stringValue"], "connection reset");
        assert_eq!(record["timeUnixNano"], "1000000000");
        assert!(record.get("spanId").is_none());

        let metric = &payloads[2].1["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0];
        assert_eq!(metric["name"], "http.requests");
        assert_eq!(metric["sum"]["isMonotonic"], true);
        assert_eq!(metric["sum"]["aggregationTemporality"], 2);
        assert_eq!(metric["sum"]["dataPoints"][0]["asDouble"], 3.0);
        assert!(metric.get("description").is_none());
    }

    #[test]
    fn test_buffers_are_reset_between_batches() {
        let http = scope("http");
        let resource = Resource::builder_empty().build();
        let mut writer = OtlpJsonWriter::new();

        Batch::new(&[span(&http, "first"), log(&http)], &resource).write_to(&mut writer);
        Batch::new(&[metric(&http)], &resource).write_to(&mut writer);
        writer.finish().unwrap();

        let payloads: Vec<_> = writer.payloads().collect();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].0, SignalKind::Metric);
        let json: Json = serde_json::from_slice(payloads[0].1).unwrap();
        assert!(json["resourceMetrics"][0]["resource"]["attributes"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_signal_paths() {
        assert_eq!(signal_path(SignalKind::Span), "/v1/traces");
        assert_eq!(signal_path(SignalKind::Log), "/v1/logs");
        assert_eq!(signal_path(SignalKind::Metric), "/v1/metrics");
    }
}
