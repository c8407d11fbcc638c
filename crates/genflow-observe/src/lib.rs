//! Observability setup for genflow: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
