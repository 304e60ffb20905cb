//! Gateway protocol message types and topic rules
//!
//! This module implements the JSON report structures exchanged on gateway
//! topics and the validation applied to every topic before it reaches the
//! transport.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
