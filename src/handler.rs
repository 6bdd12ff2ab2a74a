//! Protocol handler contract.
//!
//! The server owns sockets, processes and TLS; a handler owns what the bytes
//! mean. It runs inside the connection process, after privileges are dropped,
//! with blocking line I/O.

use crate::net::connection::{Connection, ConnectionError, ConnectionInfo};

/// Outcome of a handler other than normal completion.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler chose to end this connection. Not a failure.
    #[error("connection quit")]
    Quit,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Implements a wire protocol on top of an accepted connection.
pub trait ProtocolHandler: Send + Sync + 'static {
    fn receive(&self, conn: &mut Connection, info: &ConnectionInfo) -> Result<(), HandlerError>;
}

impl<F> ProtocolHandler for F
where
    F: Fn(&mut Connection, &ConnectionInfo) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn receive(&self, conn: &mut Connection, info: &ConnectionInfo) -> Result<(), HandlerError> {
        self(conn, info)
    }
}
