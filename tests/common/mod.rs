//! Common test utilities for kumo end-to-end tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod mock_server;

#[allow(unused_imports)]
pub use fixtures::*;
pub use mock_server::MockServer;
