//! Errors that stop the server.

use crate::config::ConfigError;
use crate::net::tls::TlsMaterialError;
use crate::security::privilege::PrivilegeError;

/// Fatal server errors. Everything else is logged and survived.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("TLS material: {0}")]
    TlsMaterial(#[from] TlsMaterialError),
    #[error("privileges: {0}")]
    Privilege(#[from] PrivilegeError),
    #[error("failed to daemonize: {0}")]
    Daemonize(#[source] nix::Error),
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error("none of the {0} configured listeners could be started")]
    NoListeners(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn invalid_config_is_a_config_error() {
        let config = ServerConfig {
            user: Some("mail".into()),
            ..ServerConfig::default()
        };
        let err: ServerError = config.validated().unwrap_err().into();
        assert!(matches!(err, ServerError::Config(ConfigError::Validation(_))));
        assert!(err.to_string().starts_with("configuration: invalid configuration"));
    }
}
