use std::collections::HashMap;
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Endpoint, MessageSink, POLL_INTERVAL};
use crate::protocol::COMMON_HEADER_LEN;
use crate::server::ServerInner;

/// Write half of one connection. Writes to different connections do not
/// wait on each other.
type Writer = Arc<Mutex<TcpStream>>;

/// Write halves of the open TCP connections, keyed by connection id.
pub struct TcpSink {
    connections: Mutex<HashMap<u64, Writer>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl TcpSink {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    /// Register a connection and return its id.
    pub fn register(&self, stream: &TcpStream) -> io::Result<u64> {
        let writer = stream.try_clone()?;
        writer.set_write_timeout(Some(self.send_timeout))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .insert(id, Arc::new(Mutex::new(writer)));
        Ok(id)
    }

    pub fn unregister(&self, id: u64) {
        self.connections.lock().remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Shut every connection down, waking their reader threads.
    pub fn close_all(&self) {
        let writers: Vec<Writer> = self.connections.lock().drain().map(|(_, w)| w).collect();
        for writer in writers {
            let _ = writer.lock().shutdown(Shutdown::Both);
        }
    }
}

impl MessageSink for TcpSink {
    /// A failed write drops the connection. Only the target connection is
    /// locked while writing.
    fn send(&self, endpoint: &Endpoint, message: &[u8]) -> io::Result<()> {
        let Endpoint::Connection(id) = *endpoint else {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{endpoint} is not a TCP connection"),
            ));
        };
        let writer = self.connections.lock().get(&id).cloned().ok_or_else(|| {
            io::Error::new(ErrorKind::NotConnected, format!("{endpoint} is closed"))
        })?;

        let mut stream = writer.lock();
        if let Err(e) = stream.write_all(message) {
            let _ = stream.shutdown(Shutdown::Both);
            drop(stream);
            self.connections.lock().remove(&id);
            return Err(e);
        }
        Ok(())
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub(crate) fn accept_loop(
    listener: TcpListener,
    inner: Arc<ServerInner>,
    sink: Arc<TcpSink>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if !inner.is_allowed(peer_addr.ip()) {
                    tracing::info!(%peer_addr, "connection refused by IP restriction");
                    continue;
                }
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let inner = inner.clone();
                let sink = sink.clone();
                let running = running.clone();
                let spawned = thread::Builder::new()
                    .name(format!("bfcp-conn-{peer_addr}"))
                    .spawn(move || Connection::handle(stream, peer_addr, inner, sink, running));
                if let Err(e) = spawned {
                    tracing::warn!(%peer_addr, error = %e, "failed to spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single BFCP client connection with its own lifecycle.
struct Connection {
    id: u64,
    reader: BufReader<TcpStream>,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: register the connection and run its message loop.
    fn handle(
        stream: TcpStream,
        peer_addr: SocketAddr,
        inner: Arc<ServerInner>,
        sink: Arc<TcpSink>,
        running: Arc<AtomicBool>,
    ) {
        let id = match sink.register(&stream) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "failed to register connection");
                return;
            }
        };

        tracing::info!(%peer_addr, connection_id = id, "client connected");

        let mut conn = Connection {
            id,
            reader: BufReader::new(stream),
            peer_addr,
        };

        let reason = conn.run(&inner, &running);
        conn.cleanup(&sink);

        tracing::info!(%peer_addr, connection_id = id, reason, "client disconnected");
    }

    /// Read framed messages until the peer goes away. Returns the reason
    /// for exiting.
    fn run(&mut self, inner: &ServerInner, running: &AtomicBool) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let mut header = [0u8; COMMON_HEADER_LEN];
            match self.reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return "connection closed by client";
                }
                Err(_) => return "read error",
            }

            let words = usize::from(u16::from_be_bytes([header[2], header[3]]));
            let mut message = vec![0u8; COMMON_HEADER_LEN + words * 4];
            message[..COMMON_HEADER_LEN].copy_from_slice(&header);
            if self
                .reader
                .read_exact(&mut message[COMMON_HEADER_LEN..])
                .is_err()
            {
                return "read error";
            }

            tracing::trace!(peer = %self.peer_addr, len = message.len(), "message received");
            if let Err(e) = inner.handle_message(Endpoint::Connection(self.id), &message) {
                tracing::debug!(peer = %self.peer_addr, error = %e, "message rejected");
            }
        }

        "server shutting down"
    }

    fn cleanup(&self, sink: &TcpSink) {
        sink.unregister(self.id);
    }
}
