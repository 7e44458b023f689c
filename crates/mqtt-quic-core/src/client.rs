//! Client façade: a thread-safe handle over one QUIC connection.
//!
//! All protocol I/O runs on a dedicated worker thread; façade methods
//! may be called from any thread. Mutations that require protocol
//! action are queued into the stream store and signalled through the
//! wakeup channel, so the engine itself is only ever touched by the
//! worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use mio::{Interest, Poll};
use tracing::{debug, error, info};

use crate::constants::{CONNECT_WAIT, MAX_READ_CHUNK};
use crate::endpoint;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::streams::StreamStore;
use crate::tls::TrustConfig;
use crate::wakeup::{SOCKET_TOKEN, Wakeup};
use crate::worker::Worker;

#[derive(Debug, Default)]
struct Lifecycle {
    running: bool,
    connected: bool,
}

enum WaitOutcome {
    Connected,
    Exited,
    TimedOut,
}

/// State shared between the façade and the worker thread.
pub(crate) struct Shared {
    lifecycle: Mutex<Lifecycle>,
    cv: Condvar,
    close_requested: AtomicBool,
    pub(crate) store: StreamStore,
    last_error: Mutex<String>,
    wakeup: Mutex<Option<Wakeup>>,
    resolved_address: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        Shared {
            lifecycle: Mutex::new(Lifecycle::default()),
            cv: Condvar::new(),
            close_requested: AtomicBool::new(false),
            store: StreamStore::default(),
            last_error: Mutex::new(String::new()),
            wakeup: Mutex::new(None),
            resolved_address: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lifecycle.lock().unwrap().running
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.lifecycle.lock().unwrap().connected
    }

    /// Handshake-completed transition; flips `connected` exactly once
    /// per connection lifetime.
    pub(crate) fn set_connected(&self, alpn: &[u8]) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if !lifecycle.connected {
            lifecycle.connected = true;
            drop(lifecycle);
            info!(
                alpn = %String::from_utf8_lossy(alpn),
                "QUIC handshake completed"
            );
            self.cv.notify_all();
        }
    }

    /// Worker exit: the connection is gone, wake all waiters.
    pub(crate) fn finish(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        lifecycle.running = false;
        lifecycle.connected = false;
        drop(lifecycle);
        self.cv.notify_all();
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn set_error(&self, message: &str) {
        error!("{}", message);
        *self.last_error.lock().unwrap() = message.to_string();
    }

    fn clear_error(&self) {
        self.last_error.lock().unwrap().clear();
    }

    fn last_error(&self) -> String {
        self.last_error.lock().unwrap().clone()
    }

    fn signal_wakeup(&self) {
        if let Some(wakeup) = self.wakeup.lock().unwrap().as_ref() {
            wakeup.signal();
        }
    }

    /// Reset lifecycle and stream state for a fresh connection attempt.
    fn begin_run(&self) {
        self.close_requested.store(false, Ordering::SeqCst);
        self.store.reset();
        let mut lifecycle = self.lifecycle.lock().unwrap();
        lifecycle.running = true;
        lifecycle.connected = false;
    }

    fn wait_connected(&self, timeout: Duration) -> WaitOutcome {
        let guard = self.lifecycle.lock().unwrap();
        let (guard, result) = self
            .cv
            .wait_timeout_while(guard, timeout, |l| !l.connected && l.running)
            .unwrap();
        if guard.connected {
            WaitOutcome::Connected
        } else if result.timed_out() && guard.running {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Exited
        }
    }
}

/// A client-side QUIC connection to a named server.
///
/// Created in a disconnected state; [`connect`](Self::connect) performs
/// the handshake synchronously and spawns the worker. All methods are
/// safe to call from any thread.
pub struct QuicClient {
    host_for_tls: String,
    connect_address: String,
    port: u16,
    trust: Mutex<TrustConfig>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cleanup: Mutex<()>,
    next_stream_id: AtomicU64,
}

impl QuicClient {
    /// Create a client for `host:port`. The host is used both for the
    /// UDP connection and for TLS server-name verification.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self::with_address(host.clone(), host, port)
    }

    /// Create a client that connects to `connect_address:port` while
    /// presenting and verifying `host_for_tls` during the handshake.
    ///
    /// An empty `connect_address` falls back to `host_for_tls`.
    pub fn with_address(
        host_for_tls: impl Into<String>,
        connect_address: impl Into<String>,
        port: u16,
    ) -> Self {
        let host_for_tls = host_for_tls.into();
        let connect_address = {
            let addr = connect_address.into();
            if addr.is_empty() {
                host_for_tls.clone()
            } else {
                addr
            }
        };
        QuicClient {
            host_for_tls,
            connect_address,
            port,
            trust: Mutex::new(TrustConfig::default()),
            shared: Arc::new(Shared::new()),
            worker: Mutex::new(None),
            cleanup: Mutex::new(()),
            next_stream_id: AtomicU64::new(0),
        }
    }

    /// Trust this PEM file of CAs instead of the `MQTT_QUIC_CA_FILE`
    /// environment variable.
    pub fn set_ca_file(&self, path: impl Into<String>) {
        self.trust.lock().unwrap().ca_file = Some(path.into());
    }

    /// Trust this directory of hashed CAs instead of the
    /// `MQTT_QUIC_CA_PATH` environment variable.
    pub fn set_ca_path(&self, path: impl Into<String>) {
        self.trust.lock().unwrap().ca_path = Some(path.into());
    }

    /// Connect and complete the QUIC/TLS handshake with the given ALPN
    /// protocol. Synchronous; blocks the caller until the handshake
    /// completes, fails, or times out. Returns success immediately if
    /// already connected.
    pub fn connect(&self, alpn: &[u8]) -> Result<()> {
        if self.shared.is_connected() {
            return Ok(());
        }
        if self.shared.is_running() {
            // A previous attempt's worker is still alive (e.g. after a
            // connect timeout); it must be closed before retrying.
            return Err(self.capture(Error::Protocol {
                message: "connection attempt already in progress".into(),
            }));
        }
        self.shared.clear_error();

        let trust = {
            let configured = self.trust.lock().unwrap().clone();
            if configured.is_empty() {
                TrustConfig::from_env()
            } else {
                configured
            }
        };

        let endpoint = endpoint::connect_udp(&self.connect_address, self.port)
            .map_err(|e| self.capture(e))?;
        *self.shared.resolved_address.lock().unwrap() = Some(endpoint.resolved_address.clone());

        let engine = Engine::new(
            &self.host_for_tls,
            alpn,
            &trust,
            endpoint.local_addr,
            endpoint.peer_addr,
        )
        .map_err(|e| self.capture(e))?;

        let poll = Poll::new().map_err(|e| self.capture(e.into()))?;
        let mut socket = mio::net::UdpSocket::from_std(endpoint.socket);
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)
            .map_err(|e| self.capture(e.into()))?;
        let wakeup = Wakeup::new(poll.registry()).map_err(|e| self.capture(e))?;
        *self.shared.wakeup.lock().unwrap() = Some(wakeup);

        self.next_stream_id.store(0, Ordering::SeqCst);
        self.shared.begin_run();

        let worker = Worker {
            poll,
            socket,
            engine,
            shared: Arc::clone(&self.shared),
        };
        let handle = std::thread::Builder::new()
            .name("mqtt-quic-worker".into())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.shared.finish();
                self.capture(e.into())
            })?;
        *self.worker.lock().unwrap() = Some(handle);
        self.shared.signal_wakeup();

        match self.shared.wait_connected(CONNECT_WAIT) {
            WaitOutcome::Connected => Ok(()),
            WaitOutcome::TimedOut => {
                let err = Error::HandshakeTimeout;
                self.shared.set_error(&err.to_string());
                Err(err)
            }
            WaitOutcome::Exited => {
                let stored = self.shared.last_error();
                if stored.is_empty() {
                    Err(self.capture(Error::HandshakeFailed))
                } else {
                    Err(Error::Protocol { message: stored })
                }
            }
        }
    }

    /// Open a locally-initiated bidirectional stream and return its id.
    pub fn open_stream(&self) -> Result<i64> {
        if !self.shared.is_connected() {
            return Err(self.capture(Error::NotConnected));
        }
        let stream_id = self.next_stream_id.fetch_add(4, Ordering::SeqCst);
        self.shared.store.register(stream_id);
        self.shared.signal_wakeup();
        debug!(stream_id, "opened stream");
        Ok(stream_id as i64)
    }

    /// Queue bytes for ordered delivery on a stream. Does not signal
    /// end-of-stream; use [`close_stream`](Self::close_stream) for that.
    pub fn write_stream(&self, stream_id: i64, data: &[u8]) -> Result<()> {
        if !self.shared.is_running() {
            return Err(self.capture(Error::NotConnected));
        }
        if stream_id < 0 {
            return Err(self.capture(Error::Protocol {
                message: format!("invalid stream id {}", stream_id),
            }));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.shared.store.append_send(stream_id as u64, data, false);
        self.shared.signal_wakeup();
        Ok(())
    }

    /// Consume buffered received bytes in FIFO order, up to an internal
    /// chunk limit. Returns an empty buffer when nothing is pending.
    pub fn read_stream(&self, stream_id: i64) -> Vec<u8> {
        if stream_id < 0 {
            return Vec::new();
        }
        let data = self.shared.store.drain_recv(stream_id as u64, MAX_READ_CHUNK);
        if !data.is_empty() {
            debug!(stream_id, len = data.len(), "read stream data");
        }
        data
    }

    /// Shut down the write side of a stream after any queued bytes have
    /// been delivered.
    pub fn close_stream(&self, stream_id: i64) -> Result<()> {
        if !self.shared.is_running() {
            return Ok(());
        }
        if stream_id < 0 {
            return Err(self.capture(Error::Protocol {
                message: format!("invalid stream id {}", stream_id),
            }));
        }
        self.shared.store.append_send(stream_id as u64, &[], true);
        self.shared.signal_wakeup();
        Ok(())
    }

    /// Close the connection: emits a connection-close to the peer, stops
    /// the worker, and releases its resources. Idempotent.
    pub fn close(&self) {
        let _guard = self.cleanup.lock().unwrap();
        self.shared.close_requested.store(true, Ordering::SeqCst);
        self.shared.signal_wakeup();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        // The worker owned the socket, engine, and poll; dropping the
        // wakeup last mirrors the setup order.
        *self.shared.wakeup.lock().unwrap() = None;
    }

    /// True from handshake completion until the worker exits.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// True once the peer has signalled end-of-stream (FIN or reset).
    /// Buffered bytes may still be pending in [`read_stream`](Self::read_stream).
    pub fn stream_finished(&self, stream_id: i64) -> bool {
        stream_id >= 0 && self.shared.store.stream_finished(stream_id as u64)
    }

    /// Message from the most recent failure, or an empty string.
    pub fn last_error(&self) -> String {
        self.shared.last_error()
    }

    /// Textual form of the address actually connected, once known.
    pub fn last_resolved_address(&self) -> Option<String> {
        self.shared.resolved_address.lock().unwrap().clone()
    }

    /// Record an error for `last_error` and hand it back to the caller.
    fn capture(&self, e: Error) -> Error {
        self.shared.set_error(&e.to_string());
        e
    }
}

impl Drop for QuicClient {
    fn drop(&mut self) {
        self.close();
    }
}
