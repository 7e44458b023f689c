//! In-process QUIC echo server for integration tests.
//!
//! Accepts connections with ALPN `mqtt` and echoes every byte received
//! on a stream back on the same stream, propagating FIN. Runs its own
//! single-threaded receive loop on a background thread until stopped.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::RngCore;
use tracing::{debug, trace};

use crate::{Result, TestCert};

const MAX_DATAGRAM_SIZE: usize = 1350;
const RECV_TICK: Duration = Duration::from_millis(25);

/// Buffered echo state for one stream.
#[derive(Default)]
struct Echo {
    data: Vec<u8>,
    offset: usize,
    fin: bool,
    fin_sent: bool,
}

struct Session {
    conn: quiche::Connection,
    echoes: HashMap<u64, Echo>,
}

/// A loopback QUIC server that echoes stream data.
pub struct EchoServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EchoServer {
    /// Bind a loopback port and start serving in a background thread.
    pub fn start(cert: &TestCert) -> Result<EchoServer> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(RECV_TICK))?;
        let addr = socket.local_addr()?;
        let config = server_config(cert)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("mqtt-quic-echo".into())
            .spawn(move || run(socket, config, stop))?;

        debug!(%addr, "echo server started");
        Ok(EchoServer {
            addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening port on 127.0.0.1.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn server_config(cert: &TestCert) -> Result<quiche::Config> {
    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION)?;
    config.load_cert_chain_from_pem_file(cert.cert_path().to_str().unwrap())?;
    config.load_priv_key_from_pem_file(cert.key_path().to_str().unwrap())?;
    config.set_application_protos(&[b"mqtt"])?;
    config.set_max_idle_timeout(30_000);
    config.set_max_recv_udp_payload_size(65535);
    config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_initial_max_data(10_000_000);
    config.set_initial_max_stream_data_bidi_local(1_000_000);
    config.set_initial_max_stream_data_bidi_remote(1_000_000);
    config.set_initial_max_stream_data_uni(1_000_000);
    config.set_initial_max_streams_bidi(100);
    config.set_initial_max_streams_uni(100);
    Ok(config)
}

fn run(socket: UdpSocket, mut config: quiche::Config, shutdown: Arc<AtomicBool>) {
    let local = socket.local_addr().expect("server socket has local addr");
    let mut buf = vec![0u8; 65536];
    let mut out = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut sessions: HashMap<quiche::ConnectionId<'static>, Session> = HashMap::new();

    while !shutdown.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                ingest_packet(&socket, &mut config, &mut sessions, &mut buf[..len], from, local);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => break,
        }

        for session in sessions.values_mut() {
            if matches!(session.conn.timeout(), Some(d) if d.is_zero()) {
                session.conn.on_timeout();
            }
            collect_readable(session);
            flush_echoes(session);
            flush_egress(&socket, &mut session.conn, &mut out);
        }
        sessions.retain(|_, s| !s.conn.is_closed());
    }

    for session in sessions.values_mut() {
        let _ = session.conn.close(false, 0, b"server shutdown");
        flush_egress(&socket, &mut session.conn, &mut out);
    }
}

fn ingest_packet(
    socket: &UdpSocket,
    config: &mut quiche::Config,
    sessions: &mut HashMap<quiche::ConnectionId<'static>, Session>,
    pkt: &mut [u8],
    from: SocketAddr,
    local: SocketAddr,
) {
    let hdr = match quiche::Header::from_slice(pkt, quiche::MAX_CONN_ID_LEN) {
        Ok(hdr) => hdr,
        Err(_) => return,
    };
    let dcid = hdr.dcid.clone().into_owned();

    let key = if sessions.contains_key(&dcid) {
        dcid
    } else {
        if hdr.ty != quiche::Type::Initial {
            trace!(?dcid, "non-Initial packet for unknown connection");
            return;
        }
        let mut scid_bytes = [0u8; quiche::MAX_CONN_ID_LEN];
        rand::rng().fill_bytes(&mut scid_bytes);
        let scid = quiche::ConnectionId::from_vec(scid_bytes.to_vec());
        let conn = match quiche::accept(&scid, None, local, from, config) {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "accept failed");
                return;
            }
        };
        debug!(%from, "accepted connection");
        let key = scid.into_owned();
        sessions.insert(
            key.clone(),
            Session {
                conn,
                echoes: HashMap::new(),
            },
        );
        key
    };

    let session = sessions.get_mut(&key).expect("session just ensured");
    let info = quiche::RecvInfo { from, to: local };
    match session.conn.recv(pkt, info) {
        Ok(_) | Err(quiche::Error::Done) => {}
        Err(e) => debug!(error = %e, "connection recv failed"),
    }
    // Answer handshake flights promptly rather than on the next tick.
    let mut out = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        match session.conn.send(&mut out) {
            Ok((n, info)) => {
                let _ = socket.send_to(&out[..n], info.to);
            }
            Err(quiche::Error::Done) => break,
            Err(_) => break,
        }
    }
}

fn collect_readable(session: &mut Session) {
    let mut sbuf = [0u8; 65536];
    let readable: Vec<u64> = session.conn.readable().collect();
    for stream_id in readable {
        loop {
            match session.conn.stream_recv(stream_id, &mut sbuf) {
                Ok((n, fin)) => {
                    let echo = session.echoes.entry(stream_id).or_default();
                    echo.data.extend_from_slice(&sbuf[..n]);
                    echo.fin |= fin;
                    trace!(stream_id, len = n, fin, "echo buffered");
                    if fin {
                        break;
                    }
                }
                Err(quiche::Error::Done) => break,
                Err(_) => break,
            }
        }
    }
}

fn flush_echoes(session: &mut Session) {
    for (&stream_id, echo) in session.echoes.iter_mut() {
        let remaining = echo.offset < echo.data.len();
        if !remaining && (!echo.fin || echo.fin_sent) {
            continue;
        }
        match session
            .conn
            .stream_send(stream_id, &echo.data[echo.offset..], echo.fin)
        {
            Ok(n) => {
                echo.offset += n;
                if echo.offset >= echo.data.len() && echo.fin {
                    echo.fin_sent = true;
                }
            }
            Err(quiche::Error::Done) => {}
            Err(_) => {}
        }
    }
}

fn flush_egress(socket: &UdpSocket, conn: &mut quiche::Connection, out: &mut [u8]) {
    loop {
        match conn.send(out) {
            Ok((n, info)) => {
                let _ = socket.send_to(&out[..n], info.to);
            }
            Err(quiche::Error::Done) => break,
            Err(_) => break,
        }
    }
}
