//! Network transport glue for BFCP.
//!
//! The floor control engine never touches sockets. Transports feed raw
//! buffers into [`Server::handle_message`](crate::Server::handle_message)
//! and deliver built messages through a [`MessageSink`]:
//!
//! - **TCP** ([`tcp`]): one thread per connection, messages framed by the
//!   payload length of the common header.
//!
//! - **UDP** ([`udp`]): a single socket; every datagram is one message and
//!   replies go to the datagram source.

pub mod tcp;
pub mod udp;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

pub use tcp::TcpSink;
pub use udp::UdpTransport;

/// Upper bound for delivering one message before a peer is considered dead.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How often transport threads wake up to check whether the server stopped.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where a message came from, and where replies to it go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A TCP connection, identified by the id its transport assigned.
    Connection(u64),
    /// A UDP peer.
    Datagram(SocketAddr),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(id) => write!(f, "tcp#{id}"),
            Self::Datagram(addr) => write!(f, "udp:{addr}"),
        }
    }
}

/// Which transport [`Server::start`](crate::Server::start) binds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
}

/// Delivers built messages to peers.
///
/// Called outside the server lock, so an implementation may block up to
/// its send timeout.
pub trait MessageSink: Send + Sync {
    fn send(&self, endpoint: &Endpoint, message: &[u8]) -> io::Result<()>;
}
