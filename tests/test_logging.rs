//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format and level parsing from environment variable values.

use iotcore_device::observability::logging::{build_filter, parse_level, LogFormat};
use iotcore_device::{session_span, token_span};
use tracing::Level;

#[test]
fn test_log_format_parse_known_values() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for value in ["invalid", "", "xml", "yaml", "123"] {
        assert_eq!(LogFormat::parse(value), LogFormat::Json, "Failed for {value:?}");
    }
}

#[test]
fn test_log_format_parse_whitespace() {
    assert_eq!(LogFormat::parse("  pretty  "), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("compact\n"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("\tjson"), LogFormat::Json);
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level(" WARN "), Level::WARN);
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level("Trace"), Level::TRACE);
    assert_eq!(parse_level("info"), Level::INFO);
    assert_eq!(parse_level("loud"), Level::INFO);
}

#[test]
fn test_filter_keeps_requested_level_for_device_code() {
    let rendered = build_filter(Level::TRACE).to_string();

    assert!(rendered.contains("trace"));
    for target in ["rumqttc", "reqwest", "hyper", "rustls"] {
        assert!(
            rendered.contains(&format!("{target}=warn")),
            "{target} should be quieted in {rendered}"
        );
    }
}

#[test]
fn test_span_macros_carry_fields() {
    let session = session_span!(client_id = "projects/p/devices/d", operation = "publish");
    let token = token_span!(audience = "proj", ttl = 3600u64);

    // No subscriber is installed, so the spans are disabled but still usable.
    session.in_scope(|| token.in_scope(|| ()));
}
