use wd_telemetry::logging::{self, LogFormat};

#[test]
fn test_init_logging_human() {
    // Should not panic; second call is a safe no-op.
    logging::init_logging("test-service", "debug");
    logging::init_logging("test-service", "info");

    tracing::info!(request_id = "ab12cd34", "human-readable log line");
}

#[test]
fn test_init_logging_json() {
    // The global subscriber is already set by whichever test ran first,
    // so this silently no-ops.
    logging::init_logging_json("test-service-json", "info");

    tracing::info!(request_id = "ab12cd34", "json log line");
}

#[test]
fn test_init_dispatches_on_format() {
    logging::init(LogFormat::Json, "dispatch-test", "warn");
    logging::init(LogFormat::Human, "dispatch-test", "warn");
}
