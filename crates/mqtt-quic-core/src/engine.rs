//! Protocol engine: owns the quiche connection and drives packet I/O,
//! timers, stream transfer, and connection close.
//!
//! The engine is a single-writer resource: after `connect` hands it to
//! the worker, only the worker thread touches it. Cross-thread input
//! arrives exclusively through the stream store and the wakeup channel.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::UdpSocket;
use rand::TryRngCore;
use tracing::{debug, info, trace};

use crate::constants::{
    CLOSE_SEND_BUFFER, HANDSHAKE_TIMEOUT, MAX_POLL_TIMEOUT, MAX_RECV_UDP_PAYLOAD,
    MAX_SEND_UDP_PAYLOAD, SCID_LEN,
};
use crate::error::{Error, Result};
use crate::streams::StreamStore;
use crate::tls::{self, TrustConfig};

pub(crate) struct Engine {
    conn: quiche::Connection,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    handshake_deadline: Instant,
    send_buf: Vec<u8>,
    stream_buf: Vec<u8>,
}

impl Engine {
    /// Create the connection object and its TLS session.
    ///
    /// `host_for_tls` is presented via SNI and checked against the peer
    /// certificate. The initial source connection ID comes from the
    /// process CSPRNG; a CSPRNG failure aborts the connect.
    pub(crate) fn new(
        host_for_tls: &str,
        alpn: &[u8],
        trust: &TrustConfig,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Result<Engine> {
        let mut config = tls::client_config(alpn, trust)?;

        let mut scid_bytes = [0u8; SCID_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut scid_bytes)
            .map_err(|e| Error::Crypto {
                message: format!("CSPRNG failure while generating connection ID: {}", e),
            })?;
        let scid = quiche::ConnectionId::from_ref(&scid_bytes);

        let conn = quiche::connect(Some(host_for_tls), &scid, local_addr, peer_addr, &mut config)
            .map_err(|e| Error::Protocol {
                message: format!("failed to create connection: {}", e),
            })?;

        info!(server_name = host_for_tls, %peer_addr, "QUIC connection created");

        Ok(Engine {
            conn,
            local_addr,
            peer_addr,
            handshake_deadline: Instant::now() + HANDSHAKE_TIMEOUT,
            send_buf: vec![0u8; MAX_SEND_UDP_PAYLOAD],
            stream_buf: vec![0u8; MAX_RECV_UDP_PAYLOAD],
        })
    }

    /// Feed one received datagram to the connection. A processing error
    /// other than "no more work" is fatal.
    pub(crate) fn read_packet(&mut self, pkt: &mut [u8]) -> Result<()> {
        let info = quiche::RecvInfo {
            from: self.peer_addr,
            to: self.local_addr,
        };
        match self.conn.recv(pkt, info) {
            Ok(_) | Err(quiche::Error::Done) => Ok(()),
            Err(e) => Err(self.engine_error("recv failed", e)),
        }
    }

    /// Poll timeout for the event loop, capped to keep wake-ups bounded.
    pub(crate) fn poll_timeout(&self) -> Duration {
        self.conn
            .timeout()
            .unwrap_or(MAX_POLL_TIMEOUT)
            .min(MAX_POLL_TIMEOUT)
    }

    /// Run the connection's timers if the expiry has passed.
    pub(crate) fn handle_expiry(&mut self) {
        if matches!(self.conn.timeout(), Some(d) if d.is_zero()) {
            trace!("connection timer expired");
            self.conn.on_timeout();
        }
    }

    /// Move readable stream bytes into the receive buffers, preserving
    /// wire order and the FIN flag.
    pub(crate) fn drain_readable(&mut self, store: &StreamStore) -> Result<()> {
        let readable: Vec<u64> = self.conn.readable().collect();
        for stream_id in readable {
            loop {
                match self.conn.stream_recv(stream_id, &mut self.stream_buf) {
                    Ok((n, fin)) => {
                        debug!(stream_id, len = n, fin, "recv stream data");
                        store.deliver_recv(stream_id, &self.stream_buf[..n], fin);
                        if fin {
                            break;
                        }
                    }
                    Err(quiche::Error::Done) => break,
                    Err(quiche::Error::StreamReset(code)) => {
                        debug!(stream_id, code, "stream reset by peer");
                        store.mark_closed(stream_id);
                        break;
                    }
                    Err(e) => return Err(self.engine_error("stream recv failed", e)),
                }
            }
            if self.conn.stream_finished(stream_id) {
                store.mark_closed(stream_id);
            }
        }
        Ok(())
    }

    /// Drain pending send queues into the connection's stream buffers,
    /// advancing each chunk's cursor by the amount the engine accepted.
    pub(crate) fn flush_streams(&mut self, store: &StreamStore) -> Result<()> {
        let mut outgoing = store.lock_outgoing();
        for (&stream_id, queue) in outgoing.iter_mut() {
            while let Some(chunk) = queue.front_mut() {
                let remaining = &chunk.data[chunk.offset..];
                let written = match self.conn.stream_send(stream_id, remaining, chunk.fin) {
                    Ok(n) => n,
                    // No capacity right now; retry on a later cycle.
                    Err(quiche::Error::Done) => break,
                    // The peer has not granted this stream yet; the chunk
                    // stays queued until a MAX_STREAMS arrives.
                    Err(quiche::Error::StreamLimit) => break,
                    Err(quiche::Error::StreamStopped(code)) => {
                        debug!(stream_id, code, "peer stopped stream, dropping queued data");
                        queue.clear();
                        store.mark_closed(stream_id);
                        break;
                    }
                    Err(e) => return Err(self.engine_error("stream send failed", e)),
                };
                chunk.offset += written;
                trace!(stream_id, written, fin = chunk.fin, "stream data queued");
                if chunk.offset >= chunk.data.len() {
                    queue.pop_front();
                } else {
                    // Partial write: the stream is flow-blocked.
                    break;
                }
            }
        }
        outgoing.retain(|_, queue| !queue.is_empty());
        Ok(())
    }

    /// Emit pending datagrams until the engine reports none remain.
    pub(crate) fn flush_egress(&mut self, socket: &UdpSocket) -> Result<()> {
        loop {
            let written = match self.conn.send(&mut self.send_buf) {
                Ok((n, _info)) => n,
                Err(quiche::Error::Done) => return Ok(()),
                Err(e) => return Err(self.engine_error("send failed", e)),
            };
            match socket.send(&self.send_buf[..written]) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // Socket buffer full; the dropped packet is recovered
                    // by loss detection.
                    trace!(len = written, "egress would block, dropping datagram");
                    return Ok(());
                }
                Err(e) => {
                    return Err(Error::Socket {
                        message: format!("send failed: {}", e),
                    });
                }
            }
        }
    }

    /// Emit a single connection-close datagram unless the connection is
    /// already in its closing or draining period.
    pub(crate) fn send_connection_close(&mut self, socket: &UdpSocket) {
        if self.conn.is_closed() || self.conn.is_draining() {
            return;
        }
        match self.conn.close(false, 0, b"") {
            Ok(()) | Err(quiche::Error::Done) => {}
            Err(e) => {
                debug!(error = %e, "connection close failed");
                return;
            }
        }
        let mut buf = vec![0u8; CLOSE_SEND_BUFFER];
        while let Ok((n, _info)) = self.conn.send(&mut buf) {
            if socket.send(&buf[..n]).is_err() {
                break;
            }
        }
    }

    pub(crate) fn is_established(&self) -> bool {
        self.conn.is_established()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// True once the handshake deadline has passed without completion.
    pub(crate) fn handshake_expired(&self) -> bool {
        !self.conn.is_established() && Instant::now() >= self.handshake_deadline
    }

    /// Negotiated application protocol, once established.
    pub(crate) fn application_proto(&self) -> &[u8] {
        self.conn.application_proto()
    }

    /// Human-readable reason for a closed connection, if one was recorded.
    pub(crate) fn close_reason(&self) -> Option<String> {
        let describe = |kind: &str, err: &quiche::ConnectionError| {
            let reason = String::from_utf8_lossy(&err.reason);
            if reason.is_empty() {
                format!("connection closed by {} (code {})", kind, err.error_code)
            } else {
                format!(
                    "connection closed by {} (code {}): {}",
                    kind, err.error_code, reason
                )
            }
        };
        if let Some(err) = self.conn.peer_error() {
            return Some(describe("peer", err));
        }
        if let Some(err) = self.conn.local_error() {
            return Some(describe("local endpoint", err));
        }
        None
    }

    /// Fold any locally recorded close reason into an engine error.
    fn engine_error(&self, what: &str, e: quiche::Error) -> Error {
        let message = match self.conn.local_error() {
            Some(local) if !local.reason.is_empty() => format!(
                "{}: {} ({})",
                what,
                e,
                String::from_utf8_lossy(&local.reason)
            ),
            _ => format!("{}: {}", what, e),
        };
        Error::Protocol { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> Engine {
        let local: SocketAddr = "127.0.0.1:34567".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        Engine::new("localhost", b"mqtt", &TrustConfig::default(), local, peer)
            .expect("engine should build without I/O")
    }

    #[test]
    fn new_engine_is_not_established() {
        let engine = test_engine();
        assert!(!engine.is_established());
        assert!(!engine.is_closed());
        assert!(!engine.handshake_expired());
    }

    #[test]
    fn poll_timeout_is_capped() {
        let engine = test_engine();
        assert!(engine.poll_timeout() <= MAX_POLL_TIMEOUT);
    }

    #[test]
    fn flush_streams_buffers_pending_chunks() {
        let mut engine = test_engine();
        let store = StreamStore::default();
        store.register(0);
        store.append_send(0, b"pending", false);
        // Before the handshake the stream has no send capacity; the
        // chunk must stay queued rather than be dropped or error.
        engine.flush_streams(&store).expect("no fatal error");
        let outgoing = store.lock_outgoing();
        let queue = outgoing.get(&0).expect("chunk retained");
        assert_eq!(queue.front().unwrap().offset, 0);
    }

    #[test]
    fn close_reason_is_empty_before_close() {
        let engine = test_engine();
        assert!(engine.close_reason().is_none());
    }
}
