//! Telemetry records flowing through the pipeline.
//!
//! A [`TelemetryRecord`] is one finished unit of telemetry (a span, a log
//! record or a metric point) tagged with the [`InstrumentationScope`] that
//! produced it. Records are immutable once built; scopes are shared between
//! records through an [`Arc`].

use opentelemetry::trace::{SpanId, SpanKind, TraceId};
use opentelemetry::KeyValue;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// A named, optionally versioned, logical source of telemetry.
///
/// Attributes are sorted ascending by key when the scope is built and cannot
/// be changed afterwards.
///
/// ```
/// use opentelemetry::KeyValue;
/// use telemetry_batch_export::InstrumentationScope;
///
/// let scope = InstrumentationScope::builder("kafka-client")
///     .version("2.1.0")
///     .attributes(vec![KeyValue::new("b", 1), KeyValue::new("a", 2)])
///     .build();
///
/// let keys: Vec<_> = scope.attributes().iter().map(|kv| kv.key.as_str()).collect();
/// assert_eq!(keys, ["a", "b"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentationScope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl InstrumentationScope {
    /// Starts building a scope with the given name.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> InstrumentationScopeBuilder {
        InstrumentationScopeBuilder {
            name: name.into(),
            version: None,
            attributes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Scope attributes, sorted ascending by key.
    pub fn attributes(&self) -> &[KeyValue] {
        &self.attributes
    }
}

/// Builder for [`InstrumentationScope`].
#[derive(Debug)]
pub struct InstrumentationScopeBuilder {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl InstrumentationScopeBuilder {
    pub fn version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes = attributes.into_iter().collect();
        self
    }

    pub fn build(mut self) -> InstrumentationScope {
        self.attributes
            .sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        InstrumentationScope {
            name: self.name,
            version: self.version,
            attributes: self.attributes,
        }
    }
}

/// Which kind of telemetry a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKind {
    Span,
    Log,
    Metric,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Span => write!(f, "span"),
            SignalKind::Log => write!(f, "log"),
            SignalKind::Metric => write!(f, "metric"),
        }
    }
}

/// Outcome recorded on a finished span.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error {
        description: Cow<'static, str>,
    },
}

/// A finished span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: SpanId,
    pub name: Cow<'static, str>,
    pub kind: SpanKind,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: Vec<KeyValue>,
    pub status: SpanStatus,
}

/// Log severity, numbered as in the OpenTelemetry log data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 1,
    Debug = 5,
    Info = 9,
    Warn = 13,
    Error = 17,
    Fatal = 21,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    pub fn number(&self) -> i32 {
        *self as i32
    }
}

/// An emitted log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: SystemTime,
    pub severity: Severity,
    pub body: Cow<'static, str>,
    pub attributes: Vec<KeyValue>,
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
}

/// Value of a collected metric point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Sum { value: f64, monotonic: bool },
    Gauge(f64),
}

/// One metric data point produced by a collection tick.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: Cow<'static, str>,
    pub description: Cow<'static, str>,
    pub unit: Cow<'static, str>,
    pub timestamp: SystemTime,
    pub value: MetricValue,
    pub attributes: Vec<KeyValue>,
}

/// The payload of a [`TelemetryRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Span(SpanRecord),
    Log(LogRecord),
    Metric(MetricPoint),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Span(_) => SignalKind::Span,
            Signal::Log(_) => SignalKind::Log,
            Signal::Metric(_) => SignalKind::Metric,
        }
    }
}

/// One unit of telemetry together with the scope that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    scope: Arc<InstrumentationScope>,
    payload: Signal,
}

impl TelemetryRecord {
    pub fn new(scope: Arc<InstrumentationScope>, payload: Signal) -> Self {
        Self { scope, payload }
    }

    pub fn span(scope: Arc<InstrumentationScope>, span: SpanRecord) -> Self {
        Self::new(scope, Signal::Span(span))
    }

    pub fn log(scope: Arc<InstrumentationScope>, log: LogRecord) -> Self {
        Self::new(scope, Signal::Log(log))
    }

    pub fn metric(scope: Arc<InstrumentationScope>, point: MetricPoint) -> Self {
        Self::new(scope, Signal::Metric(point))
    }

    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    pub fn payload(&self) -> &Signal {
        &self.payload
    }

    pub fn kind(&self) -> SignalKind {
        self.payload.kind()
    }
}
