//! Observability for the publish/subscribe client
//!
//! Structured logging setup and the span macros used around client operations.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
