//! Per-connection state, line I/O and the deferred TLS upgrade.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Describe the connection to handlers (ports, hostnames, peer address)
//! - Line-oriented send/recv over plaintext or TLS
//! - STARTTLS-style upgrade: plaintext → encrypted, never back
//! - Count connection processes in flight for shutdown reporting
//!
//! A [`Connection`] lives only inside its connection process and uses
//! blocking I/O; nothing here touches the async runtime.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustls::{ServerConnection, StreamOwned};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Metadata handed to the protocol handler.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub server_name: String,
    /// Listen spec of the accepting listener, as configured.
    pub listen_spec: String,
    pub local_port: u16,
    pub local_hostname: String,
    pub remote_port: u16,
    pub remote_hostname: String,
    pub remote_service: String,
    pub remote_ip: IpAddr,
}

impl ConnectionInfo {
    /// Gather metadata for an accepted stream, resolving names where possible.
    pub fn resolve(
        id: ConnectionId,
        server_name: &str,
        listen_spec: &str,
        stream: &TcpStream,
    ) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;

        let local_hostname = dns_lookup::get_hostname().unwrap_or_else(|_| local.ip().to_string());
        let (remote_hostname, remote_service) = match dns_lookup::getnameinfo(&peer, 0) {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!(peer_addr = %peer, error = ?e, "Reverse lookup failed");
                (peer.ip().to_string(), peer.port().to_string())
            }
        };

        Ok(Self {
            id,
            server_name: server_name.to_string(),
            listen_spec: listen_spec.to_string(),
            local_port: local.port(),
            local_hostname,
            remote_port: peer.port(),
            remote_hostname,
            remote_service,
            remote_ip: peer.ip(),
        })
    }

    /// Peer socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_ip, self.remote_port)
    }
}

/// Errors raised by connection I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("TLS is not configured on this server")]
    TlsUnavailable,
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),
    #[error("TLS session setup failed: {0}")]
    Tls(#[from] rustls::Error),
    #[error("connection is closed")]
    Closed,
}

enum Transport {
    Plain(BufReader<TcpStream>),
    Encrypted(Box<BufReader<StreamOwned<ServerConnection, TcpStream>>>),
    Closed,
}

/// One accepted client connection.
///
/// Owns the socket; dropping the connection closes it, sending a TLS
/// close_notify first when the session is encrypted.
pub struct Connection {
    transport: Transport,
    tls: Option<Arc<rustls::ServerConfig>>,
    max_line_length: usize,
    id: ConnectionId,
}

impl Connection {
    /// Wrap a blocking stream. The connection starts in plaintext even when TLS material is attached.
    pub fn new(
        stream: TcpStream,
        tls: Option<Arc<rustls::ServerConfig>>,
        max_line_length: usize,
        id: ConnectionId,
    ) -> Self {
        Self {
            transport: Transport::Plain(BufReader::new(stream)),
            tls,
            max_line_length,
            id,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether `start_handshake` can succeed on this connection.
    pub fn tls_available(&self) -> bool {
        self.tls.is_some()
    }

    /// Whether the TLS handshake has completed.
    pub fn is_encrypted(&self) -> bool {
        matches!(self.transport, Transport::Encrypted(_))
    }

    /// Write `line` followed by CRLF.
    pub fn send(&mut self, line: &str) -> Result<(), ConnectionError> {
        let writer: &mut dyn Write = match &mut self.transport {
            Transport::Plain(reader) => reader.get_mut(),
            Transport::Encrypted(reader) => reader.get_mut(),
            Transport::Closed => return Err(ConnectionError::Closed),
        };
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\r\n")?;
        writer.flush()?;
        tracing::trace!(connection_id = %self.id, line, "<-");
        Ok(())
    }

    /// Read one line without its line terminator; `Ok(None)` at end of stream.
    pub fn recv(&mut self) -> Result<Option<String>, ConnectionError> {
        let limit = self.max_line_length;
        let reader: &mut dyn BufRead = match &mut self.transport {
            Transport::Plain(reader) => reader,
            Transport::Encrypted(reader) => reader.as_mut(),
            Transport::Closed => return Err(ConnectionError::Closed),
        };

        // One extra byte leaves room for the newline of a line exactly at the limit.
        let mut buf = Vec::new();
        let read = Read::take(&mut *reader, limit as u64 + 1).read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') && buf.len() > limit {
            // The tail of an overlong line must never surface as a line of its own.
            discard_rest_of_line(reader)?;
            return Err(ConnectionError::LineTooLong { limit });
        }

        let line = String::from_utf8_lossy(chomp(&buf)).into_owned();
        tracing::trace!(connection_id = %self.id, line = %line, "->");
        Ok(Some(line))
    }

    /// Upgrade the connection to TLS in place.
    ///
    /// Calling it again once encrypted is a no-op. A failed handshake leaves
    /// the connection closed.
    pub fn start_handshake(&mut self) -> Result<(), ConnectionError> {
        let reader = match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Plain(reader) => reader,
            Transport::Encrypted(reader) => {
                self.transport = Transport::Encrypted(reader);
                tracing::debug!(connection_id = %self.id, "TLS already active, ignoring repeated handshake");
                return Ok(());
            }
            Transport::Closed => return Err(ConnectionError::Closed),
        };

        let Some(config) = self.tls.clone() else {
            self.transport = Transport::Plain(reader);
            return Err(ConnectionError::TlsUnavailable);
        };

        let pipelined = reader.buffer().len();
        if pipelined > 0 {
            tracing::warn!(
                connection_id = %self.id,
                bytes = pipelined,
                "Discarding plaintext received ahead of TLS handshake"
            );
        }
        let mut socket = reader.into_inner();
        let mut session = ServerConnection::new(config)?;

        while session.is_handshaking() {
            match session.complete_io(&mut socket) {
                Ok((0, 0)) if session.is_handshaking() => {
                    return Err(ConnectionError::Handshake(io::ErrorKind::UnexpectedEof.into()));
                }
                Ok(_) => {}
                Err(e) => return Err(ConnectionError::Handshake(e)),
            }
        }

        tracing::debug!(
            connection_id = %self.id,
            protocol = ?session.protocol_version(),
            "TLS handshake complete"
        );
        self.transport = Transport::Encrypted(Box::new(BufReader::new(StreamOwned::new(session, socket))));
        Ok(())
    }

    /// Close the connection; equivalent to dropping it.
    pub fn close(self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Transport::Encrypted(reader) = &mut self.transport {
            let stream = reader.get_mut();
            stream.conn.send_close_notify();
            let _ = stream.flush();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Consume input up to and including the next newline, or to end of stream.
fn discard_rest_of_line(reader: &mut dyn BufRead) -> io::Result<()> {
    loop {
        let (used, done) = {
            let available = reader.fill_buf()?;
            match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), available.is_empty()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

fn chomp(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Counts connection processes the listener side has spawned but not yet reaped.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly spawned connection process.
    pub fn spawned(&self) {
        self.active_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Record reaped connection processes.
    pub fn reaped(&self, count: u64) {
        let _ = self
            .active_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(count)));
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}
