//! Testing utilities and mock implementations
//!
//! Mock collaborators for exercising sessions and clock synchronization
//! without an MQTT broker or an HTTP time service.

pub mod mocks;

pub use mocks::*;
