//! net-server
//!
//! Multi-port line-protocol server with per-connection process isolation.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   SERVER PROCESS                      │
//!                    │                                                       │
//!   listen spec ─────┼─▶ listener ──┐                                        │
//!   listen spec ─────┼─▶ listener ──┼──▶ isolation (fork per connection)     │
//!   listen spec ─────┼─▶ listener ──┘            │                           │
//!                    │       ▲                   │                           │
//!                    │       │ shutdown          │                           │
//!                    │  lifecycle (signals, pid file, reaper)                │
//!                    └───────────────────────────┼───────────────────────────┘
//!                                                ▼
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │              CONNECTION PROCESS (one each)            │
//!                    │  drop privileges → connection (plaintext/TLS)         │
//!                    │                  → protocol handler → close → exit    │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use net_server::config::{load_config, ServerConfig};
use net_server::demo::{EchoHandler, SmtpHandler};
use net_server::observability::init_logging;
use net_server::{Server, ServerError};

#[derive(Parser)]
#[command(name = "net-server")]
#[command(about = "Multi-port line-protocol server with per-connection isolation", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen spec: <ipv6>/<port>, <ipv4>:<port> or <port>; repeatable
    #[arg(short, long)]
    listen: Vec<String>,

    /// User connection processes run as
    #[arg(long)]
    user: Option<String>,

    /// Group connection processes run as
    #[arg(long)]
    group: Option<String>,

    /// Pid file location
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Detach from the terminal
    #[arg(long)]
    daemon: bool,

    /// Append logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Do not load TLS material; STARTTLS becomes unavailable
    #[arg(long)]
    no_tls: bool,

    /// Demo protocol to serve
    #[arg(long, value_enum, default_value_t = Protocol::Echo)]
    protocol: Protocol,
}

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    Echo,
    Smtp,
}

impl Cli {
    fn into_config(self) -> Result<(ServerConfig, Protocol), ServerError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };

        if !self.listen.is_empty() {
            config.listen = self.listen;
        }
        if self.user.is_some() {
            config.user = self.user;
        }
        if self.group.is_some() {
            config.group = self.group;
        }
        if let Some(pid_file) = self.pid_file {
            config.pid_file = pid_file;
        }
        config.daemonize |= self.daemon;
        if self.log_file.is_some() {
            config.observability.log_file = self.log_file;
        }
        if self.no_tls {
            config.tls.enabled = false;
        }

        Ok((config.validated()?, self.protocol))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config, protocol) = match cli.into_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("net-server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("net-server: cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!(
        listen = ?config.listen,
        tls = config.tls.enabled,
        daemonize = config.daemonize,
        "Configuration loaded"
    );

    let server = match protocol {
        Protocol::Echo => Server::new(config, EchoHandler),
        Protocol::Smtp => Server::new(config, SmtpHandler),
    };

    match server.start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
