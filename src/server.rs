//! Server lifecycle coordination.
//!
//! # Responsibilities
//! - Load TLS material and verify identity before anything is bound
//! - Optionally detach, then record the pid
//! - Start one accept loop per listen spec and join them all
//! - Translate signals into shutdown, reaping and the hang-up hook
//! - Remove the pid file on the way out
//!
//! ```text
//! Starting → Running → Terminating → Stopped
//! ```

use std::sync::Arc;

use futures_util::future::join_all;
use nix::unistd::Uid;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::ProtocolHandler;
use crate::lifecycle::pidfile::PidFile;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{HangupHook, SignalWatcher};
use crate::lifecycle::startup::{self, LifecycleState, ProcessSnapshot};
use crate::net::connection::ConnectionTracker;
use crate::net::isolation::ConnectionIsolator;
use crate::net::listener::Listener;
use crate::net::tls::TlsMaterial;
use crate::security::privilege::verify_startup_identity;

/// A multi-port server dispatching every connection to `ProtocolHandler`.
pub struct Server {
    config: Arc<ServerConfig>,
    handler: Arc<dyn ProtocolHandler>,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    on_hangup: Option<HangupHook>,
}

impl Server {
    pub fn new<H: ProtocolHandler>(config: ServerConfig, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            shutdown: Shutdown::new(),
            tracker: ConnectionTracker::new(),
            on_hangup: None,
        }
    }

    /// Run `hook` on SIGHUP instead of ignoring it.
    pub fn with_hangup_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_hangup = Some(Arc::new(hook));
        self
    }

    /// Handle for requesting shutdown without a signal.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connection processes spawned and not yet reaped.
    pub fn in_flight(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Run the whole lifecycle on the calling thread until shutdown.
    ///
    /// Must not be called from inside an async runtime: daemonizing forks
    /// and the server builds its own single-threaded runtime afterwards.
    pub fn start(self) -> Result<(), ServerError> {
        let server_name = self.config.server_name.clone();
        tracing::info!(
            state = %LifecycleState::Starting,
            pid = std::process::id(),
            "Starting {}",
            server_name
        );

        // Before daemonizing and before any privilege drop: paths may be unreadable later.
        let tls = TlsMaterial::load(&self.config.tls)?;

        if self.config.daemonize {
            let keep_stdio = self.config.observability.log_file.is_none();
            startup::daemonize(keep_stdio).map_err(ServerError::Daemonize)?;
        }
        let snapshot = ProcessSnapshot::capture();
        if self.config.daemonize {
            tracing::info!(%snapshot, "Daemonized");
        }

        if let Err(e) = verify_startup_identity(snapshot.uid, &self.config) {
            tracing::error!(error = %e, "{} can't be started as root unless user and group are set", server_name);
            return Err(e.into());
        }

        tracing::info!("{} running as {}", server_name, snapshot);
        let pid_file = PidFile::new(&self.config.pid_file);
        pid_file.write_or_warn(snapshot.pid);

        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)
            .and_then(|runtime| {
                runtime.block_on(async move {
                    let listeners = self.bind();
                    self.run(listeners, tls).await
                })
            });

        pid_file.remove_or_warn();
        tracing::info!(state = %LifecycleState::Stopped, "{} stopped", server_name);
        result
    }

    /// Bind every configured listen spec. Failures are logged and skipped.
    ///
    /// Must be called within a Tokio runtime.
    pub fn bind(&self) -> Vec<Listener> {
        self.config
            .listen
            .iter()
            .filter_map(|spec| match Listener::bind(spec, self.config.listen_backlog) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    tracing::error!(listen_spec = %spec, error = %e, "Listener failed to start");
                    None
                }
            })
            .collect()
    }

    /// Serve on `listeners` until shutdown is requested.
    ///
    /// The runtime driving this future must be single-threaded, since
    /// connection processes are forked from it.
    pub async fn run(self, listeners: Vec<Listener>, tls: Option<TlsMaterial>) -> Result<(), ServerError> {
        verify_startup_identity(Uid::current(), &self.config)?;
        if listeners.is_empty() {
            return Err(ServerError::NoListeners(self.config.listen.len()));
        }

        let signals = SignalWatcher::install().map_err(ServerError::Signals)?;
        let signal_task = tokio::spawn(signals.run(
            self.config.server_name.clone(),
            self.shutdown.clone(),
            self.tracker.clone(),
            self.on_hangup.clone(),
        ));

        let isolator = Arc::new(ConnectionIsolator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.handler),
            tls,
            self.tracker.clone(),
        ));
        for listener in &listeners {
            isolator.register_listener(listener.raw_fd());
        }

        tracing::info!(
            state = %LifecycleState::Running,
            listeners = listeners.len(),
            configured = self.config.listen.len(),
            "Accepting connections"
        );

        // Joins happen only after every loop is started.
        let accept_loops: Vec<_> = listeners
            .into_iter()
            .map(|listener| tokio::spawn(listener.accept_loop(Arc::clone(&isolator), self.shutdown.subscribe())))
            .collect();
        for joined in join_all(accept_loops).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Accept loop aborted");
            }
        }

        tracing::info!(
            state = %LifecycleState::Terminating,
            in_flight = self.tracker.active_count(),
            "All listeners closed, in-flight connections finish on their own"
        );
        self.shutdown.trigger();
        if let Err(e) = signal_task.await {
            tracing::warn!(error = %e, "Signal watcher aborted");
        }
        Ok(())
    }
}
