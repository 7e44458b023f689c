//! Error types for mqtt-quic-core.

use thiserror::Error;

/// Main error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host/port lookup failed.
    #[error("resolution error: {message}")]
    Resolution { message: String },

    /// Could not create, connect, or query the UDP socket.
    #[error("socket error: {message}")]
    Socket { message: String },

    /// TLS context, peer-name binding, or CA setup failed.
    #[error("tls error: {message}")]
    Tls { message: String },

    /// CSPRNG failure at a point where no recovery is possible.
    #[error("crypto error: {message}")]
    Crypto { message: String },

    /// Fatal error reported by the QUIC engine.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The handshake did not complete within the allotted time.
    #[error("QUIC handshake timed out")]
    HandshakeTimeout,

    /// The worker exited before the handshake completed.
    #[error("QUIC handshake failed")]
    HandshakeFailed,

    /// Operation requires an initialized connection.
    #[error("QUIC connection not initialized")]
    NotConnected,

    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
