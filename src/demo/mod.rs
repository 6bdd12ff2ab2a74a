//! Example protocol handlers used by the `net-server` binary.

pub mod echo;
pub mod smtp;

pub use echo::EchoHandler;
pub use smtp::SmtpHandler;
