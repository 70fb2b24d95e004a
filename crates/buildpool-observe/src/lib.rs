//! Observability setup for buildpool: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
