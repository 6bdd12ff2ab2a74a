//! Multi-port, TLS-upgradeable network server skeleton.
//!
//! Binds one listener per listen spec, forks an isolated, privilege-dropped
//! process for every accepted connection and hands it to a
//! [`ProtocolHandler`] that speaks the actual line protocol.

pub mod config;
pub mod demo;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod server;

pub use config::ServerConfig;
pub use error::ServerError;
pub use handler::{HandlerError, ProtocolHandler};
pub use lifecycle::Shutdown;
pub use net::{Connection, ConnectionInfo};
pub use server::Server;
