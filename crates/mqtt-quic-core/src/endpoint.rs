//! UDP endpoint: name resolution and a connected, non-blocking socket.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::debug;

use crate::error::{Error, Result};

/// A connected UDP socket plus the address pair recorded for the
/// connection's path descriptor.
pub(crate) struct Endpoint {
    pub socket: UdpSocket,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    /// Textual form of the address actually connected, for diagnostics.
    pub resolved_address: String,
}

/// Resolve `connect_address:port` and connect a UDP socket to the first
/// address that accepts, trying each candidate in resolver order.
pub(crate) fn connect_udp(connect_address: &str, port: u16) -> Result<Endpoint> {
    let addrs = (connect_address, port)
        .to_socket_addrs()
        .map_err(|e| Error::Resolution {
            message: e.to_string(),
        })?;

    let mut connected: Option<(UdpSocket, SocketAddr)> = None;
    for addr in addrs {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = match UdpSocket::bind(bind_addr) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if socket.connect(addr).is_ok() {
            connected = Some((socket, addr));
            break;
        }
    }

    let (socket, peer_addr) = connected.ok_or_else(|| Error::Socket {
        message: "Failed to create/connect UDP socket".into(),
    })?;

    let local_addr = socket.local_addr().map_err(|e| Error::Socket {
        message: format!("getsockname failed: {}", e),
    })?;
    socket.set_nonblocking(true).map_err(|e| Error::Socket {
        message: format!("failed to set socket non-blocking: {}", e),
    })?;

    let resolved_address = peer_addr.ip().to_string();
    debug!(%local_addr, %peer_addr, "UDP socket connected");

    Ok(Endpoint {
        socket,
        local_addr,
        peer_addr,
        resolved_address,
    })
}
