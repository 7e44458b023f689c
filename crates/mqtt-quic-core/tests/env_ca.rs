//! CA trust resolution through the process environment.
//!
//! Kept in its own test binary: integration test files run as separate
//! processes, so mutating `MQTT_QUIC_CA_FILE` here cannot race the
//! other suites.

use mqtt_quic_core::QuicClient;
use mqtt_quic_core::constants::CA_FILE_ENV;
use mqtt_quic_core::logging::init_test_logging;
use mqtt_quic_test_utils::{EchoServer, TestCert};

#[test]
fn ca_file_env_is_honored() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();

    // An unusable bundle is a hard error, not a silent fallback.
    std::env::set_var(CA_FILE_ENV, "/dev/null");
    let client = QuicClient::with_address("localhost", "127.0.0.1", server.port());
    let err = client.connect(b"mqtt").unwrap_err();
    assert!(err.to_string().contains("Failed to load CA bundle"));
    client.close();

    // Pointing the variable at the server's certificate succeeds.
    std::env::set_var(CA_FILE_ENV, cert.cert_path());
    let client = QuicClient::with_address("localhost", "127.0.0.1", server.port());
    client.connect(b"mqtt").expect("connect with env CA");
    assert!(client.is_connected());
    client.close();

    std::env::remove_var(CA_FILE_ENV);
}
