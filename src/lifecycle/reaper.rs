//! Reaping of exited connection processes.
//!
//! Child-exit signals coalesce, so one notification can stand for several
//! exits; every call drains all children that have already terminated.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Collect every exited child without blocking. Returns how many were reaped.
///
/// Having no children at all is the normal idle state, not an error.
pub fn reap_children() -> u64 {
    let mut reaped = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(WaitStatus::Exited(pid, code)) => {
                reaped += 1;
                if code == 0 {
                    tracing::trace!(child = %pid, "Connection process exited");
                } else {
                    tracing::debug!(child = %pid, code, "Connection process exited with failure");
                }
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                reaped += 1;
                tracing::debug!(child = %pid, signal = ?signal, "Connection process killed by signal");
            }
            // Stop/continue notifications are not exits.
            Ok(_) => {}
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    reaped
}
