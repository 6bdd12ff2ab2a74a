//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Server and connection processes produce:
//!     → logging.rs (structured log events, pid and connection id fields)
//!
//! Consumers:
//!     → stdout, or whatever the supervisor captures
//!     → log_file when configured (shared with connection processes, append mode)
//! ```
//!
//! # Design Decisions
//! - Structured fields over formatted prefixes
//! - Level configurable via config, overridable through RUST_LOG

pub mod logging;

pub use logging::init_logging;
