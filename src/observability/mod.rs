//! Observability for the device runtime
//!
//! Structured logging only; the device has no metrics or health endpoints.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{session_span, token_span};
