//! mqtt-quic-test-utils: test infrastructure for mqtt-quic.
//!
//! Provides:
//! - TestCert: self-signed certificate generation for loopback servers
//! - EchoServer: in-process QUIC server that echoes stream data back

mod cert;
mod echo_server;

pub use cert::TestCert;
pub use echo_server::EchoServer;

/// Convenience result type for test setup.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
