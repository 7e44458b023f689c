//! TLS session configuration for the client side.
//!
//! Builds the engine configuration used for the QUIC handshake: TLS 1.3
//! with ALPN, full peer verification against the TLS hostname, and CA
//! trust resolved from explicit configuration, the environment, or the
//! engine's built-in default trust paths, in that order.

use crate::constants::{
    ACTIVE_CONN_ID_LIMIT, CA_FILE_ENV, CA_PATH_ENV, IDLE_TIMEOUT, INITIAL_MAX_DATA,
    INITIAL_MAX_STREAMS_BIDI, INITIAL_MAX_STREAMS_UNI, INITIAL_MAX_STREAM_DATA, MAX_ACK_DELAY_MS,
    MAX_RECV_UDP_PAYLOAD, MAX_SEND_UDP_PAYLOAD,
};
use crate::error::{Error, Result};

/// CA trust sources for peer certificate verification.
///
/// An empty config falls back to the `MQTT_QUIC_CA_FILE` /
/// `MQTT_QUIC_CA_PATH` environment variables, and past that to the TLS
/// stack's default trust paths.
#[derive(Debug, Clone, Default)]
pub struct TrustConfig {
    /// Path to a PEM file of trusted CAs.
    pub ca_file: Option<String>,
    /// Directory of hashed trust anchors.
    pub ca_path: Option<String>,
}

impl TrustConfig {
    /// Read trust sources from the process environment.
    ///
    /// Empty variables are treated as unset.
    pub fn from_env() -> Self {
        fn non_empty(var: &str) -> Option<String> {
            std::env::var(var).ok().filter(|v| !v.is_empty())
        }
        Self {
            ca_file: non_empty(CA_FILE_ENV),
            ca_path: non_empty(CA_PATH_ENV),
        }
    }

    /// True if neither source is set.
    pub fn is_empty(&self) -> bool {
        self.ca_file.is_none() && self.ca_path.is_none()
    }
}

fn ca_load_error() -> Error {
    Error::Tls {
        message: format!(
            "Failed to load CA bundle from {}/{}",
            CA_FILE_ENV, CA_PATH_ENV
        ),
    }
}

/// Build the client engine configuration: ALPN, peer verification, CA
/// trust, and the transport parameters sent in the Initial.
pub(crate) fn client_config(alpn: &[u8], trust: &TrustConfig) -> Result<quiche::Config> {
    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION).map_err(|e| Error::Tls {
        message: format!("failed to create TLS context: {}", e),
    })?;

    config
        .set_application_protos(&[alpn])
        .map_err(|e| Error::Tls {
            message: format!("failed to set ALPN protocol: {}", e),
        })?;

    config.verify_peer(true);

    // CA precedence: explicit/env sources first. A configured source that
    // cannot be loaded is a hard error rather than a silent fallback.
    if let Some(file) = &trust.ca_file {
        config
            .load_verify_locations_from_file(file)
            .map_err(|_| ca_load_error())?;
    }
    if let Some(dir) = &trust.ca_path {
        config
            .load_verify_locations_from_directory(dir)
            .map_err(|_| ca_load_error())?;
    }
    // With no configured source the TLS stack's default trust paths and
    // bundled roots remain in effect.

    config.set_max_idle_timeout(IDLE_TIMEOUT.as_millis() as u64);
    config.set_max_recv_udp_payload_size(MAX_RECV_UDP_PAYLOAD);
    config.set_max_send_udp_payload_size(MAX_SEND_UDP_PAYLOAD);
    config.set_initial_max_data(INITIAL_MAX_DATA);
    config.set_initial_max_stream_data_bidi_local(INITIAL_MAX_STREAM_DATA);
    config.set_initial_max_stream_data_bidi_remote(INITIAL_MAX_STREAM_DATA);
    config.set_initial_max_stream_data_uni(INITIAL_MAX_STREAM_DATA);
    config.set_initial_max_streams_bidi(INITIAL_MAX_STREAMS_BIDI);
    config.set_initial_max_streams_uni(INITIAL_MAX_STREAMS_UNI);
    config.set_active_connection_id_limit(ACTIVE_CONN_ID_LIMIT);
    config.set_max_ack_delay(MAX_ACK_DELAY_MS);
    config.set_disable_active_migration(true);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_trust_builds() {
        let config = client_config(b"mqtt", &TrustConfig::default());
        assert!(config.is_ok(), "config with default trust should build");
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        let trust = TrustConfig {
            ca_file: Some("/definitely/not/a/file.pem".into()),
            ca_path: None,
        };
        let err = client_config(b"mqtt", &trust).unwrap_err();
        assert!(err.to_string().contains("Failed to load CA bundle"));
    }

    #[test]
    fn empty_ca_file_is_an_error() {
        let trust = TrustConfig {
            ca_file: Some("/dev/null".into()),
            ca_path: None,
        };
        let err = client_config(b"mqtt", &trust).unwrap_err();
        assert!(err.to_string().contains("Failed to load CA bundle"));
    }

    #[test]
    fn trust_config_empty_detection() {
        assert!(TrustConfig::default().is_empty());
        let trust = TrustConfig {
            ca_file: Some("ca.pem".into()),
            ca_path: None,
        };
        assert!(!trust.is_empty());
    }
}
