//! End-to-end tests against an in-process QUIC echo server.

use std::time::{Duration, Instant};

use mqtt_quic_core::QuicClient;
use mqtt_quic_core::logging::init_test_logging;
use mqtt_quic_test_utils::{EchoServer, TestCert};

/// An MQTT CONNECT packet (protocol level 5, keep-alive 60).
const MQTT_CONNECT: &[u8] = &[
    0x10, 0x0d, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x00, 0x00, 0x3c, 0x00, 0x00, 0x00,
];

fn connected_client(cert: &TestCert, server: &EchoServer) -> QuicClient {
    let client = QuicClient::with_address("localhost", "127.0.0.1", server.port());
    client.set_ca_file(cert.cert_path().to_str().unwrap());
    client
        .connect(b"mqtt")
        .unwrap_or_else(|e| panic!("connect failed: {} ({})", e, client.last_error()));
    client
}

/// Poll the non-blocking read side until `want` bytes arrive or the
/// deadline passes.
fn read_until(client: &QuicClient, stream_id: i64, want: usize, deadline: Duration) -> Vec<u8> {
    let start = Instant::now();
    let mut out = Vec::with_capacity(want);
    while out.len() < want && start.elapsed() < deadline {
        let chunk = client.read_stream(stream_id);
        if chunk.is_empty() {
            std::thread::sleep(Duration::from_millis(5));
        } else {
            out.extend_from_slice(&chunk);
        }
    }
    out
}

#[test]
fn echo_roundtrip() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();
    let client = connected_client(&cert, &server);
    assert!(client.is_connected());
    assert!(client.last_error().is_empty());

    let stream = client.open_stream().expect("open stream");
    assert!(stream >= 0);
    client.write_stream(stream, MQTT_CONNECT).expect("write");

    let echoed = read_until(&client, stream, MQTT_CONNECT.len(), Duration::from_secs(2));
    assert_eq!(echoed, MQTT_CONNECT);

    client.close();
    assert!(!client.is_connected());
}

#[test]
fn writes_preserve_order_across_calls() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();
    let client = connected_client(&cert, &server);

    let stream = client.open_stream().unwrap();
    let mut expected = Vec::new();
    for i in 0u8..32 {
        let piece = vec![i; 257];
        client.write_stream(stream, &piece).unwrap();
        expected.extend_from_slice(&piece);
    }

    let echoed = read_until(&client, stream, expected.len(), Duration::from_secs(10));
    assert_eq!(echoed.len(), expected.len());
    assert_eq!(echoed, expected);

    client.close();
}

#[test]
fn two_streams_multiplex_independently() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();
    let client = connected_client(&cert, &server);

    let s1 = client.open_stream().unwrap();
    let s2 = client.open_stream().unwrap();
    assert_ne!(s1, s2);

    const TOTAL: usize = 100 * 1024;
    const PIECE: usize = 10 * 1024;
    // Interleave writes so both streams are in flight together.
    for _ in 0..(TOTAL / PIECE) {
        client.write_stream(s1, &[0xAA; PIECE]).unwrap();
        client.write_stream(s2, &[0xBB; PIECE]).unwrap();
    }

    // Drain both streams concurrently; each must come back intact.
    let start = Instant::now();
    let mut got1 = Vec::with_capacity(TOTAL);
    let mut got2 = Vec::with_capacity(TOTAL);
    while (got1.len() < TOTAL || got2.len() < TOTAL) && start.elapsed() < Duration::from_secs(20) {
        let c1 = client.read_stream(s1);
        let c2 = client.read_stream(s2);
        if c1.is_empty() && c2.is_empty() {
            std::thread::sleep(Duration::from_millis(5));
        }
        got1.extend_from_slice(&c1);
        got2.extend_from_slice(&c2);
    }

    assert_eq!(got1.len(), TOTAL);
    assert_eq!(got2.len(), TOTAL);
    assert!(got1.iter().all(|&b| b == 0xAA));
    assert!(got2.iter().all(|&b| b == 0xBB));

    client.close();
}

#[test]
fn close_is_idempotent() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();
    let client = connected_client(&cert, &server);
    assert!(client.is_connected());

    client.close();
    assert!(!client.is_connected());

    // The second close must return without blocking or error.
    let start = Instant::now();
    client.close();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!client.is_connected());
}

#[test]
fn close_stream_shuts_down_write_side() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();
    let client = connected_client(&cert, &server);

    let stream = client.open_stream().unwrap();
    client.write_stream(stream, b"final words").unwrap();
    client.close_stream(stream).unwrap();

    // The server sees FIN and echoes it back after the data.
    let echoed = read_until(&client, stream, b"final words".len(), Duration::from_secs(5));
    assert_eq!(echoed, b"final words");

    // The echoed FIN eventually marks the stream finished on our side.
    let start = Instant::now();
    while !client.stream_finished(stream) && start.elapsed() < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(client.stream_finished(stream));

    client.close();
}

#[test]
fn split_hostname_and_connect_address() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();

    // TLS verifies against "localhost" while the socket dials the IP.
    let client = QuicClient::with_address("localhost", "127.0.0.1", server.port());
    client.set_ca_file(cert.cert_path().to_str().unwrap());
    client.connect(b"mqtt").expect("connect");

    assert_eq!(client.last_resolved_address().as_deref(), Some("127.0.0.1"));
    client.close();
}

#[test]
fn bad_ca_file_fails_connect() {
    init_test_logging();
    let cert = TestCert::generate().unwrap();
    let server = EchoServer::start(&cert).unwrap();

    let client = QuicClient::with_address("localhost", "127.0.0.1", server.port());
    client.set_ca_file("/dev/null");
    let err = client.connect(b"mqtt").unwrap_err();
    assert!(err.to_string().contains("Failed to load CA bundle"));
    assert!(client.last_error().contains("Failed to load CA bundle"));
    assert!(!client.is_connected());
    client.close();
}

#[test]
fn handshake_times_out_against_silent_peer() {
    init_test_logging();
    // A bound socket that never answers: packets vanish into its queue.
    let sink = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = sink.local_addr().unwrap().port();

    let client = QuicClient::with_address("localhost", "127.0.0.1", port);
    let start = Instant::now();
    let err = client.connect(b"mqtt").unwrap_err();
    let elapsed = start.elapsed();

    assert!(client.last_error().contains("handshake timed out"), "got: {}", err);
    // The protocol-level deadline fires well before the caller's cap.
    assert!(elapsed >= Duration::from_secs(9));
    assert!(elapsed < Duration::from_secs(14));
    assert!(!client.is_connected());
    client.close();
}
