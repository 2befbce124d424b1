//! End-to-end test utilities for tlsharness
//!
//! Generates key stores at runtime and runs plain or TLS test servers so the
//! client-side setup can be exercised against real handshakes.

pub mod certificates;
pub mod harness;

pub use certificates::{TestKeyStores, TEST_STORE_PASSWORD};
pub use harness::{server_tls_config, RecordedRequest, TestServer};
