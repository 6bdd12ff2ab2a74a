//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load TLS → Daemonize → Snapshot identity → Verify → Write pid file (pidfile.rs)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown (shutdown.rs)
//!     SIGHUP → Optional restart hook
//!     SIGCHLD → Reap exited connection processes (reaper.rs)
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Every accept loop stops → Listeners closed → Pid file removed
//! ```
//!
//! # Design Decisions
//! - Ordered startup: TLS material first, listeners last
//! - In-flight connection processes finish on their own; nothing is killed

pub mod pidfile;
pub mod reaper;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use pidfile::{PidFile, PidFileError};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::HangupHook;
pub use startup::LifecycleState;
