//! TCP listener implementation.
//!
//! # Responsibilities
//! - Parse a listen spec and bind to it (IPv4 or IPv6)
//! - Accept incoming TCP connections until shutdown
//! - Hand every accepted connection to the isolator
//! - Keep running through per-connection and transient accept errors

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::address::{AddressSpecError, BindDescriptor};
use crate::net::isolation::ConnectionIsolator;

/// Pause after an accept error such as EMFILE before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The listen spec matched none of the accepted forms.
    Spec(AddressSpecError),
    /// Failed to bind to address.
    Bind {
        address: String,
        source: std::io::Error,
    },
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Spec(e) => write!(f, "{}", e),
            ListenerError::Bind { address, source } => {
                write!(f, "Failed to bind {}: {}", address, source)
            }
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Spec(e) => Some(e),
            ListenerError::Bind { source, .. } => Some(source),
            ListenerError::Accept(e) => Some(e),
        }
    }
}

/// One bound, listening socket for one configured listen spec.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Listen spec as configured.
    spec: String,
    /// Parsed form of `spec`.
    descriptor: BindDescriptor,
}

impl Listener {
    /// Parse `spec`, then bind and listen with address reuse enabled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(spec: &str, backlog: i32) -> Result<Self, ListenerError> {
        let descriptor = BindDescriptor::parse(spec).map_err(ListenerError::Spec)?;
        let bind_error = |source| ListenerError::Bind {
            address: descriptor.to_string(),
            source,
        };

        let addr = descriptor.socket_addr().map_err(bind_error)?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_error)?;
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.bind(&addr.into()).map_err(bind_error)?;
        socket.listen(backlog).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;

        let inner = TcpListener::from_std(socket.into()).map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(
            pid = std::process::id(),
            listen_spec = spec,
            address = %local_addr,
            "Listening"
        );

        Ok(Self {
            inner,
            spec: spec.to_string(),
            descriptor,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Listen spec this listener was created from.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn descriptor(&self) -> &BindDescriptor {
        &self.descriptor
    }

    /// Raw descriptor of the listening socket.
    pub fn raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    /// Accept connections and dispatch each to its own connection process.
    ///
    /// Returns when `shutdown` fires; the listening socket is closed on return.
    pub async fn accept_loop(self, isolator: Arc<ConnectionIsolator>, mut shutdown: ShutdownSignal) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(listen_spec = %self.spec, "Listener stopping");
                    break;
                }
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!(listen_spec = %self.spec, peer_addr = %peer_addr, "Connection accepted");
                        if let Err(e) = isolator.dispatch(stream, &self.spec) {
                            tracing::error!(listen_spec = %self.spec, peer_addr = %peer_addr, error = %e, "Failed to isolate connection");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(listen_spec = %self.spec, error = %ListenerError::Accept(e), "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::AddressFamily;

    #[tokio::test]
    async fn binds_ipv4_spec() {
        let listener = Listener::bind("127.0.0.1:0", 0).unwrap();
        assert_eq!(listener.spec(), "127.0.0.1:0");
        assert_eq!(listener.descriptor().family, AddressFamily::Ipv4);
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn rejects_malformed_spec_before_binding() {
        let err = Listener::bind("localhost:25", 0).err().unwrap();
        assert!(matches!(err, ListenerError::Spec(_)));
    }

    #[tokio::test]
    async fn reports_address_in_use() {
        let first = Listener::bind("127.0.0.1:0", 0).unwrap();
        let spec = first.local_addr().unwrap().to_string();

        match Listener::bind(&spec, 0) {
            Err(ListenerError::Bind { address, source }) => {
                assert_eq!(address, spec);
                assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
            }
            other => panic!("expected bind failure, got {:?}", other.map(|l| l.spec)),
        }
    }

    #[tokio::test]
    async fn accept_loop_returns_on_shutdown() {
        use crate::config::ServerConfig;
        use crate::handler::HandlerError;
        use crate::lifecycle::Shutdown;
        use crate::net::connection::{Connection, ConnectionInfo, ConnectionTracker};

        let handler = |_: &mut Connection, _: &ConnectionInfo| -> Result<(), HandlerError> { Ok(()) };
        let isolator = Arc::new(ConnectionIsolator::new(
            Arc::new(ServerConfig::default()),
            Arc::new(handler),
            None,
            ConnectionTracker::new(),
        ));
        let shutdown = Shutdown::new();
        let listener = Listener::bind("127.0.0.1:0", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(listener.accept_loop(isolator, shutdown.subscribe()));
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
