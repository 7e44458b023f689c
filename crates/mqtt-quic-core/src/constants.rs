//! Protocol and configuration constants for mqtt-quic.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Default ALPN identifier for MQTT-over-QUIC connections.
pub const ALPN: &[u8] = b"mqtt";

/// Source connection ID length in bytes.
pub const SCID_LEN: usize = 8;

// =============================================================================
// Buffer Sizes
// =============================================================================

/// Egress datagram buffer; fits common path MTUs without fragmentation.
pub const MAX_SEND_UDP_PAYLOAD: usize = 1452;

/// Buffer for the final connection-close datagram (QUIC minimum).
pub const CLOSE_SEND_BUFFER: usize = 1280;

/// UDP receive buffer.
pub const MAX_RECV_UDP_PAYLOAD: usize = 65536;

/// Upper bound on bytes returned by a single stream read.
pub const MAX_READ_CHUNK: usize = 8192;

// =============================================================================
// Timing Constants
// =============================================================================

/// Protocol-level handshake deadline enforced by the worker.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wall-clock cap on a caller blocking in connect.
pub const CONNECT_WAIT: Duration = Duration::from_secs(15);

/// QUIC idle timeout.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on the worker's poll timeout so wake-ups stay responsive.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(1000);

// =============================================================================
// Transport Parameters (sent in the Initial)
// =============================================================================

pub const INITIAL_MAX_STREAMS_BIDI: u64 = 8;
pub const INITIAL_MAX_STREAMS_UNI: u64 = 8;
pub const INITIAL_MAX_STREAM_DATA: u64 = 256 * 1024;
pub const INITIAL_MAX_DATA: u64 = 1024 * 1024;
pub const ACTIVE_CONN_ID_LIMIT: u64 = 8;
pub const MAX_ACK_DELAY_MS: u64 = 1;

// =============================================================================
// Configuration Environment
// =============================================================================

/// Path to a PEM file of trusted CAs.
pub const CA_FILE_ENV: &str = "MQTT_QUIC_CA_FILE";

/// Directory of hashed trust anchors.
pub const CA_PATH_ENV: &str = "MQTT_QUIC_CA_PATH";
