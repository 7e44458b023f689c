//! Dedicated worker thread: the connection's event loop.
//!
//! One poll cycle multiplexes UDP receive, protocol timers, pending
//! application sends, and shutdown requests. A fatal error from any step
//! terminates the loop and wakes anyone blocked on the handshake.

use std::io::ErrorKind;

use mio::net::UdpSocket;
use mio::{Events, Poll};
use tracing::{debug, error, info};

use crate::client::Shared;
use crate::constants::MAX_RECV_UDP_PAYLOAD;
use crate::engine::Engine;
use crate::error::{Error, Result};

pub(crate) struct Worker {
    pub(crate) poll: Poll,
    pub(crate) socket: UdpSocket,
    pub(crate) engine: Engine,
    pub(crate) shared: std::sync::Arc<Shared>,
}

impl Worker {
    pub(crate) fn run(mut self) {
        let result = self.run_loop();
        if let Err(e) = result {
            // Shutdown-path errors are reported but not propagated.
            if self.shared.close_requested() {
                debug!(error = %e, "worker error during shutdown");
            } else {
                self.shared.set_error(&e.to_string());
            }
        }
        self.shared.finish();
        info!("worker exited");
    }

    fn run_loop(&mut self) -> Result<()> {
        // First flight: the client Initial.
        self.engine.flush_egress(&self.socket)?;

        let mut events = Events::with_capacity(4);
        let mut buf = vec![0u8; MAX_RECV_UDP_PAYLOAD];

        while self.shared.is_running() {
            let timeout = self.engine.poll_timeout();
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            // Wakeup posts carry no payload; returning from poll is the
            // observation. The state they guard is read below under the
            // stream-store locks.

            self.read_packets(&mut buf)?;
            self.engine.handle_expiry();
            self.engine.drain_readable(&self.shared.store)?;

            if self.engine.is_established() {
                self.shared.set_connected(self.engine.application_proto());
            } else if self.engine.handshake_expired() {
                return Err(Error::HandshakeTimeout);
            }

            self.engine.flush_streams(&self.shared.store)?;
            self.engine.flush_egress(&self.socket)?;

            if self.shared.close_requested() {
                self.engine.send_connection_close(&self.socket);
                break;
            }

            if self.engine.is_closed() {
                return Err(match self.engine.close_reason() {
                    Some(reason) => Error::Protocol { message: reason },
                    None => Error::ConnectionClosed,
                });
            }
        }
        Ok(())
    }

    /// Read datagrams until the socket would block.
    fn read_packets(&mut self, buf: &mut [u8]) -> Result<()> {
        loop {
            match self.socket.recv(buf) {
                Ok(n) => self.engine.read_packet(&mut buf[..n])?,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Transient receive failures (e.g. ICMP unreachable on a
                    // connected socket) are not fatal; loss detection and the
                    // handshake deadline decide the connection's fate.
                    error!(error = %e, "UDP recv failed");
                    break;
                }
            }
        }
        Ok(())
    }
}
