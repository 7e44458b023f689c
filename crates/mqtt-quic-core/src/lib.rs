//! mqtt-quic-core: client-side QUIC transport for MQTT.
//!
//! Sustains a single UDP-based QUIC connection to a named server,
//! negotiates TLS 1.3 with ALPN, and multiplexes application byte
//! streams over that connection. All protocol I/O runs on a dedicated
//! worker thread; callers interact through the thread-safe
//! [`QuicClient`] façade or the integer-handle [`registry`] intended
//! for language bindings.

pub mod client;
pub mod constants;
pub mod error;
pub mod logging;
pub mod registry;
pub mod tls;

mod endpoint;
mod engine;
mod streams;
mod wakeup;
mod worker;

pub use client::QuicClient;
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use tls::TrustConfig;
