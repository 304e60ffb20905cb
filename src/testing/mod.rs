//! Testing utilities
//!
//! Fake transport and recording listener for exercising the connection state
//! machine and gateway layer without an MQTT broker.

pub mod mocks;

pub use mocks::*;
