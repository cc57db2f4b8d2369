//! Common test utilities for ftp-output integration tests

#[allow(dead_code)]
pub mod config;
#[allow(dead_code)]
pub mod mock_server;

#[allow(unused_imports)]
pub use config::*;
#[allow(unused_imports)]
pub use mock_server::*;
