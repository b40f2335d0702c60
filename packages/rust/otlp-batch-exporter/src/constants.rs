//! Constants for the otlp-batch-exporter package.
//!
//! This file centralizes all constants to ensure consistency across the codebase
//! and provide a single source of truth for configuration parameters.

/// Environment variable names for configuration.
pub mod env_vars {
    /// GZIP compression level for compressed output (0-9).
    pub const COMPRESSION_LEVEL: &str = "OTLP_BATCH_EXPORTER_COMPRESSION_LEVEL";

    /// Service name for telemetry, used as the envelope source.
    pub const SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

    /// Base URL of the OTLP/HTTP collector.
    pub const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

    /// Global headers for OTLP export, as `key=value` pairs separated by commas.
    pub const OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
}

/// Default values for configuration parameters.
pub mod defaults {
    /// Default GZIP compression level (0-9).
    pub const COMPRESSION_LEVEL: u8 = 6;

    /// Default service name if not provided.
    pub const SERVICE_NAME: &str = "unknown-service";

    /// Default base URL for OTLP/HTTP export.
    pub const ENDPOINT: &str = "http://localhost:4318";
}

/// Per-signal OTLP/HTTP request paths.
pub mod paths {
    pub const TRACES: &str = "/v1/traces";
    pub const LOGS: &str = "/v1/logs";
    pub const METRICS: &str = "/v1/metrics";
}

/// Header names and values used on the wire.
pub mod headers {
    pub const CONTENT_TYPE: &str = "content-type";
    pub const CONTENT_ENCODING: &str = "content-encoding";
    pub const CONTENT_TYPE_JSON: &str = "application/json";
    pub const ENCODING_GZIP: &str = "gzip";
}

/// Prefix of the version identifier carried in the stdout envelope.
pub const VERSION_PREFIX: &str = "otlp-batch-exporter@";
