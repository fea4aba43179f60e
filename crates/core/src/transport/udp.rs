use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Endpoint, MessageSink, POLL_INTERVAL};
use crate::error::Result;
use crate::server::ServerInner;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_535;

/// UDP transport: one socket that both receives requests and sends
/// replies and notifications.
///
/// This layer is address-only. It does not know about users; the engine
/// resolves a user to a [`Endpoint::Datagram`] before anything is sent.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn bind(addr: &str, send_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_write_timeout(Some(send_timeout))?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl MessageSink for UdpTransport {
    fn send(&self, endpoint: &Endpoint, message: &[u8]) -> io::Result<()> {
        match *endpoint {
            Endpoint::Datagram(addr) => self.socket.send_to(message, addr).map(|_| ()),
            Endpoint::Connection(_) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{endpoint} is not a UDP peer"),
            )),
        }
    }
}

/// Receive datagrams until `running` is cleared. Each datagram is one
/// message.
pub(crate) fn receive_loop(
    transport: Arc<UdpTransport>,
    inner: Arc<ServerInner>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::SeqCst) {
        match transport.socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if !inner.is_allowed(peer.ip()) {
                    tracing::debug!(%peer, "datagram refused by IP restriction");
                    continue;
                }
                tracing::trace!(%peer, len, "datagram received");
                if let Err(e) = inner.handle_message(Endpoint::Datagram(peer), &buf[..len]) {
                    tracing::debug!(%peer, error = %e, "message rejected");
                }
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "UDP receive error");
                }
            }
        }
    }
    tracing::debug!("UDP receive loop exited");
}
