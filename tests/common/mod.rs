#![allow(dead_code)]

/// Common test utilities and fakes
///
/// This module provides shared functionality for integration tests including:
/// - A scriptable connection transport
/// - A scriptable component health probe
/// - Queue operation builders and configuration fixtures

pub mod fake_probe;
pub mod fake_transport;
pub mod test_helpers;
