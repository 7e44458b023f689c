//! Process-wide handle table mapping opaque integer handles to clients.
//!
//! This is the thin surface intended for language-binding layers: every
//! operation validates the handle under the registry lock, then runs
//! against a cloned reference so long-running calls (notably `connect`)
//! do not block other handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::client::QuicClient;

struct Registry {
    clients: HashMap<u64, Arc<QuicClient>>,
    next_handle: u64,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            clients: HashMap::new(),
            next_handle: 1,
        })
    })
}

fn insert(client: QuicClient) -> u64 {
    let mut registry = registry().lock().unwrap();
    let handle = registry.next_handle;
    // Handles are single-use tokens; the counter never decrements.
    registry.next_handle += 1;
    registry.clients.insert(handle, Arc::new(client));
    handle
}

fn get(handle: u64) -> Option<Arc<QuicClient>> {
    registry().lock().unwrap().clients.get(&handle).cloned()
}

/// Register a client for `host:port`. Returns its handle (always > 0).
pub fn create(host: &str, port: u16) -> u64 {
    insert(QuicClient::new(host, port))
}

/// Register a client with split TLS hostname and connect address.
pub fn create_with_address(host_for_tls: &str, connect_address: &str, port: u16) -> u64 {
    insert(QuicClient::with_address(host_for_tls, connect_address, port))
}

/// Connect with the given ALPN protocol. Returns 0 on success, -1 on
/// failure (see [`last_error`]).
pub fn connect(handle: u64, alpn: &[u8]) -> i32 {
    match get(handle) {
        Some(client) => match client.connect(alpn) {
            Ok(()) => 0,
            Err(_) => -1,
        },
        None => -1,
    }
}

/// Open a bidirectional stream. Returns the stream id (>= 0), or -1.
pub fn open_stream(handle: u64) -> i64 {
    match get(handle) {
        Some(client) => client.open_stream().unwrap_or(-1),
        None => -1,
    }
}

/// Queue bytes on a stream. Returns 0 on success, -1 on failure.
pub fn write_stream(handle: u64, stream_id: i64, data: &[u8]) -> i32 {
    match get(handle) {
        Some(client) => match client.write_stream(stream_id, data) {
            Ok(()) => 0,
            Err(_) => -1,
        },
        None => -1,
    }
}

/// Read buffered bytes from a stream, empty when none are pending.
pub fn read_stream(handle: u64, stream_id: i64) -> Vec<u8> {
    match get(handle) {
        Some(client) => client.read_stream(stream_id),
        None => Vec::new(),
    }
}

/// Shut down the write side of a stream. Returns 0 on success, -1 on
/// failure.
pub fn close_stream(handle: u64, stream_id: i64) -> i32 {
    match get(handle) {
        Some(client) => match client.close_stream(stream_id) {
            Ok(()) => 0,
            Err(_) => -1,
        },
        None => -1,
    }
}

/// Close the connection and invalidate the handle. A second close of
/// the same handle is a no-op.
pub fn close(handle: u64) {
    let client = registry().lock().unwrap().clients.remove(&handle);
    if let Some(client) = client {
        client.close();
    }
}

/// True while the handle's connection is established.
pub fn is_connected(handle: u64) -> bool {
    get(handle).map(|c| c.is_connected()).unwrap_or(false)
}

/// Message from the handle's most recent failure.
pub fn last_error(handle: u64) -> String {
    match get(handle) {
        Some(client) => client.last_error(),
        None => "invalid connection".to_string(),
    }
}

/// Textual form of the address the handle actually connected to.
pub fn last_resolved_address(handle: u64) -> Option<String> {
    get(handle).and_then(|c| c.last_resolved_address())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_positive_and_distinct() {
        let a = create("localhost", 1883);
        let b = create("localhost", 1884);
        assert!(a > 0);
        assert!(b > a);
        close(a);
        close(b);
    }

    #[test]
    fn unknown_handle_operations_fail_cleanly() {
        assert_eq!(connect(u64::MAX, b"mqtt"), -1);
        assert_eq!(open_stream(u64::MAX), -1);
        assert_eq!(write_stream(u64::MAX, 0, b"x"), -1);
        assert!(read_stream(u64::MAX, 0).is_empty());
        assert_eq!(close_stream(u64::MAX, 0), -1);
        assert!(!is_connected(u64::MAX));
        assert_eq!(last_error(u64::MAX), "invalid connection");
        assert!(last_resolved_address(u64::MAX).is_none());
    }

    #[test]
    fn close_invalidates_the_handle() {
        let handle = create_with_address("broker.example", "127.0.0.1", 8883);
        assert!(!is_connected(handle));
        close(handle);
        assert_eq!(last_error(handle), "invalid connection");
        // Second close is a no-op.
        close(handle);
    }
}
