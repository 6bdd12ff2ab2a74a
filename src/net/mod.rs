//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listen spec
//!     → address.rs (parse into a bind descriptor)
//!     → listener.rs (bind, accept loop)
//!     → isolation.rs (fork a connection process per accepted socket)
//!     → connection.rs (line I/O, deferred TLS via tls.rs)
//!     → Hand off to the protocol handler
//!
//! Connection States:
//!     Accepted → Isolated → Plaintext → (Encrypted) → Closed
//! ```
//!
//! # Design Decisions
//! - One accept loop per listen spec; a bad spec only loses its own listener
//! - Connections never share a process with the listener or each other
//! - TLS starts only when the handler asks for it

pub mod address;
pub mod connection;
pub mod isolation;
pub mod listener;
pub mod tls;

pub use address::{AddressFamily, BindDescriptor};
pub use connection::{Connection, ConnectionError, ConnectionInfo};
pub use listener::Listener;
pub use tls::TlsMaterial;
