//! Testing utilities and mock implementations
//!
//! This module provides a mock session for exercising the client controller
//! without an MQTT broker.

pub mod mocks;

pub use mocks::*;
