//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP, SIGCHLD)
//! - Translate signals to internal control events
//! - Trigger appropriate actions (shutdown, hang-up hook, reaping)
//! - Reset dispositions inside connection processes
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Termination is a control event seen by every listener, not an unwinding error
//! - SIGHUP calls an optional hook; without one it is logged and ignored

use std::sync::Arc;

use nix::sys::signal::{self as nix_signal, SigHandler};
use tokio::signal::unix::{signal as unix_signal, Signal, SignalKind};

use crate::lifecycle::reaper::reap_children;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::ConnectionTracker;

/// Callback run on SIGHUP.
pub type HangupHook = Arc<dyn Fn() + Send + Sync>;

/// Control events derived from signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Terminate(&'static str),
    Hangup,
    ChildExited,
}

/// Handle one control event.
pub fn handle_event(
    event: ControlEvent,
    server_name: &str,
    shutdown: &Shutdown,
    tracker: &ConnectionTracker,
    on_hangup: Option<&HangupHook>,
) {
    match event {
        ControlEvent::Terminate(signal) => {
            tracing::info!(pid = std::process::id(), signal, "{} terminated by admin", server_name);
            shutdown.trigger();
        }
        ControlEvent::Hangup => match on_hangup {
            Some(hook) => {
                tracing::info!("Hang-up received, running restart hook");
                hook();
            }
            None => tracing::info!("Hang-up received, no restart hook installed"),
        },
        ControlEvent::ChildExited => {
            let reaped = reap_children();
            tracker.reaped(reaped);
        }
    }
}

/// Process signal streams, installed before the server starts running.
pub struct SignalWatcher {
    terminate: Signal,
    interrupt: Signal,
    hangup: Signal,
    child: Signal,
}

impl SignalWatcher {
    /// Register handlers. Must be called within a Tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: unix_signal(SignalKind::terminate())?,
            interrupt: unix_signal(SignalKind::interrupt())?,
            hangup: unix_signal(SignalKind::hangup())?,
            child: unix_signal(SignalKind::child())?,
        })
    }

    /// Translate signals into control events until shutdown.
    pub async fn run(
        mut self,
        server_name: String,
        shutdown: Shutdown,
        tracker: ConnectionTracker,
        on_hangup: Option<HangupHook>,
    ) {
        let mut stopped = shutdown.subscribe();
        loop {
            let event = tokio::select! {
                _ = stopped.recv() => break,
                _ = self.terminate.recv() => ControlEvent::Terminate("SIGTERM"),
                _ = self.interrupt.recv() => ControlEvent::Terminate("SIGINT"),
                _ = self.hangup.recv() => ControlEvent::Hangup,
                _ = self.child.recv() => ControlEvent::ChildExited,
            };
            handle_event(event, &server_name, &shutdown, &tracker, on_hangup.as_ref());
        }
        // Children that exited while the loop was winding down.
        tracker.reaped(reap_children());
    }
}

/// Detach a freshly forked connection process from the server's handlers.
///
/// The inherited handlers would forward signals to the server's event loop,
/// so a SIGTERM aimed at one connection would stop the whole server.
pub fn reset_in_connection_process() {
    let dispositions = [
        (nix_signal::SIGINT, SigHandler::SigIgn),
        (nix_signal::SIGTERM, SigHandler::SigDfl),
        (nix_signal::SIGHUP, SigHandler::SigDfl),
        (nix_signal::SIGCHLD, SigHandler::SigDfl),
    ];
    for (sig, handler) in dispositions {
        // SAFETY: installs only SIG_IGN/SIG_DFL, no Rust code runs in signal context.
        if let Err(e) = unsafe { nix_signal::signal(sig, handler) } {
            tracing::warn!(signal = ?sig, error = %e, "Failed to reset signal disposition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn terminate_triggers_shutdown() {
        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        handle_event(ControlEvent::Terminate("SIGTERM"), "test", &shutdown, &tracker, None);
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn hangup_runs_hook_when_present() {
        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook: HangupHook = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle_event(ControlEvent::Hangup, "test", &shutdown, &tracker, None);
        handle_event(ControlEvent::Hangup, "test", &shutdown, &tracker, Some(&hook));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!shutdown.is_triggered());
    }
}
