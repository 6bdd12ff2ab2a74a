//! Process-per-connection isolation.
//!
//! Every accepted connection gets its own forked process. Privileges are
//! dropped inside that process, so an identity change, crash or hung handler
//! stays confined to one connection. Threads cannot give this guarantee: a
//! uid change applies to the whole process.
//!
//! # Socket ownership
//! After fork both processes hold the connection. The listener side closes
//! its copy immediately; the connection process closes the other one when it
//! is done. Only the last close sends FIN to the peer.

use std::net::TcpStream;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::libc;
use nix::unistd::{self, fork, ForkResult, Pid};

use crate::config::ServerConfig;
use crate::handler::{HandlerError, ProtocolHandler};
use crate::lifecycle::signals;
use crate::net::connection::{Connection, ConnectionId, ConnectionInfo, ConnectionTracker};
use crate::net::tls::TlsMaterial;
use crate::security::privilege::drop_privileges;

/// Exit status of a connection process whose handler finished or quit.
pub const EXIT_OK: i32 = 0;
/// Exit status of a connection process whose handler failed.
pub const EXIT_HANDLER_ERROR: i32 = 1;
/// Exit status of a connection process that could not drop privileges.
pub const EXIT_PRIVILEGE_ERROR: i32 = 2;

/// Errors on the listener side of isolation.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    #[error("failed to prepare accepted socket: {0}")]
    Socket(#[from] std::io::Error),
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
}

/// Spawns and runs connection processes.
pub struct ConnectionIsolator {
    config: Arc<ServerConfig>,
    handler: Arc<dyn ProtocolHandler>,
    tls: Option<TlsMaterial>,
    tracker: ConnectionTracker,
    listener_fds: Mutex<Vec<RawFd>>,
}

impl ConnectionIsolator {
    pub fn new(
        config: Arc<ServerConfig>,
        handler: Arc<dyn ProtocolHandler>,
        tls: Option<TlsMaterial>,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            config,
            handler,
            tls,
            tracker,
            listener_fds: Mutex::new(Vec::new()),
        }
    }

    /// Remember a listening socket so connection processes can close their copy.
    pub fn register_listener(&self, fd: RawFd) {
        self.listener_fds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(fd);
    }

    /// Fork a connection process for `stream` and return its pid.
    ///
    /// Never waits on the child. The caller's event loop must be
    /// single-threaded: the child continues with only the forking thread.
    pub fn dispatch(
        &self,
        stream: tokio::net::TcpStream,
        listen_spec: &str,
    ) -> Result<Pid, IsolationError> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        let id = ConnectionId::new();

        // SAFETY: the child never returns into the parent's runtime; it runs
        // blocking code to completion and leaves through _exit.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let status = self.serve_connection(stream, listen_spec, id);
                // SAFETY: skips destructors and atexit handlers owned by the parent.
                unsafe { libc::_exit(status) }
            }
            Ok(ForkResult::Parent { child }) => {
                drop(stream);
                self.tracker.spawned();
                tracing::debug!(
                    connection_id = %id,
                    child = %child,
                    in_flight = self.tracker.active_count(),
                    "Connection process started"
                );
                Ok(child)
            }
            Err(e) => Err(IsolationError::Fork(e)),
        }
    }

    /// Body of the connection process. Returns its exit status.
    fn serve_connection(&self, stream: TcpStream, listen_spec: &str, id: ConnectionId) -> i32 {
        signals::reset_in_connection_process();
        self.close_inherited_listeners();
        let pid = std::process::id();

        if let Some((user, group)) = self.config.run_as() {
            if let Err(e) = drop_privileges(user, group, Some(self.config.working_directory.as_path())) {
                tracing::error!(pid, connection_id = %id, error = %e, "Refusing connection, privileges not dropped");
                return EXIT_PRIVILEGE_ERROR;
            }
        }

        if self.config.idle_timeout_secs > 0 {
            let timeout = Duration::from_secs(self.config.idle_timeout_secs);
            if let Err(e) = stream.set_read_timeout(Some(timeout)) {
                tracing::warn!(pid, connection_id = %id, error = %e, "Failed to set idle timeout");
            }
        }

        let info = match ConnectionInfo::resolve(id, &self.config.server_name, listen_spec, &stream) {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(pid, connection_id = %id, error = %e, "Connection lost before it could be described");
                return EXIT_HANDLER_ERROR;
            }
        };
        tracing::info!(
            pid,
            connection_id = %id,
            peer_addr = %info.remote_addr(),
            "Connection accepted on port {} from port {} at {} ({})",
            info.listen_spec,
            info.remote_port,
            info.remote_ip,
            info.remote_hostname
        );

        let mut conn = Connection::new(
            stream,
            self.tls.as_ref().map(TlsMaterial::server_config),
            self.config.max_line_length,
            id,
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.receive(&mut conn, &info)));
        let status = match outcome {
            Ok(Ok(())) => EXIT_OK,
            Ok(Err(HandlerError::Quit)) => {
                tracing::debug!(pid, connection_id = %id, "Handler quit connection");
                EXIT_OK
            }
            Ok(Err(e)) => {
                tracing::error!(pid, connection_id = %id, error = %e, "Handler failed");
                EXIT_HANDLER_ERROR
            }
            Err(payload) => {
                tracing::error!(pid, connection_id = %id, panic = panic_message(payload.as_ref()), "Handler panicked");
                EXIT_HANDLER_ERROR
            }
        };

        conn.close();
        tracing::info!(
            pid,
            connection_id = %id,
            "Connection closed on port {} by {}",
            info.listen_spec,
            self.config.server_name
        );
        status
    }

    fn close_inherited_listeners(&self) {
        let fds = self
            .listener_fds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for &fd in fds.iter() {
            let _ = unistd::close(fd);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
