//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name the server announces and logs under.
    pub server_name: String,

    /// Listen specs, one listener each (`<ipv6>/<port>`, `<ipv4>:<port>` or `<port>`).
    pub listen: Vec<String>,

    /// TLS material for STARTTLS-style upgrades.
    pub tls: TlsConfig,

    /// Unprivileged user connection processes run as.
    pub user: Option<String>,

    /// Unprivileged group connection processes run as.
    pub group: Option<String>,

    /// Directory connection processes change into after dropping privileges.
    pub working_directory: PathBuf,

    /// Where the server pid is recorded.
    pub pid_file: PathBuf,

    /// Detach from the terminal before binding.
    pub daemonize: bool,

    /// Pending-connection backlog passed to listen(2).
    pub listen_backlog: i32,

    /// Per-connection read timeout in seconds (0 disables).
    pub idle_timeout_secs: u64,

    /// Longest line `recv` accepts, in bytes.
    pub max_line_length: usize,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "example.com".to_string(),
            listen: vec!["25".to_string(), "486".to_string(), "587".to_string()],
            tls: TlsConfig::default(),
            user: None,
            group: None,
            working_directory: default_working_directory(),
            pid_file: PathBuf::from("pid"),
            daemonize: false,
            listen_backlog: 0,
            idle_timeout_secs: 300,
            max_line_length: 8192,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The user/group pair, when both are configured.
    pub fn run_as(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.group) {
            (Some(user), Some(group)) => Some((user.as_str(), group.as_str())),
            _ => None,
        }
    }
}

fn default_working_directory() -> PathBuf {
    std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// TLS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Load key and certificate at startup. When false, handlers cannot upgrade.
    pub enabled: bool,

    /// Path to private key file (PEM).
    pub private_key_path: PathBuf,

    /// Path to certificate chain file (PEM).
    pub certificate_path: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            private_key_path: PathBuf::from("server.key"),
            certificate_path: Some(PathBuf::from("server.crt")),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Append log lines to this file instead of stdout. Connection processes
    /// share it with the server.
    pub log_file: Option<PathBuf>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}
