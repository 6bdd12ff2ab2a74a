//! Startup orchestration helpers.
//!
//! # Responsibilities
//! - Track the server lifecycle state
//! - Detach into the background when configured
//! - Snapshot process identity after detaching
//!
//! # Design Decisions
//! - Fail fast: TLS and identity errors abort before any listener binds
//! - Pid file problems are warnings, never fatal
//! - Listeners start last (traffic only when ready)

use std::fmt;

use nix::unistd::{self, Gid, Uid};

/// Server lifecycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Starting,
    Running,
    Terminating,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Process identity, read after daemonizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub uid: Uid,
    pub gid: Gid,
}

impl ProcessSnapshot {
    pub fn capture() -> Self {
        Self {
            pid: std::process::id(),
            uid: Uid::current(),
            gid: Gid::current(),
        }
    }
}

impl fmt::Display for ProcessSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID=>{}, UID=>{}, GID=>{}", self.pid, self.uid, self.gid)
    }
}

/// Detach from the controlling terminal, keeping the working directory.
///
/// With `keep_stdio` the standard streams stay attached, which is where logs
/// go when no log file is configured. Otherwise they are pointed at
/// /dev/null. Must run before the async runtime exists; only the child returns.
pub fn daemonize(keep_stdio: bool) -> nix::Result<()> {
    unistd::daemon(true, keep_stdio)
}
