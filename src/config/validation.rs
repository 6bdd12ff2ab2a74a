//! Configuration validation.
//!
//! Listen specs are deliberately not checked here: a malformed spec only
//! takes down its own listener, so it is reported when that listener starts.

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("server_name must not be empty")]
    EmptyServerName,
    #[error("user and group must be configured together")]
    IncompleteRunAs,
    #[error("max_line_length must be greater than zero")]
    ZeroLineLength,
}

/// Check a configuration, returning every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server_name.trim().is_empty() {
        errors.push(ValidationError::EmptyServerName);
    }
    if config.user.is_some() != config.group.is_some() {
        errors.push(ValidationError::IncompleteRunAs);
    }
    if config.max_line_length == 0 {
        errors.push(ValidationError::ZeroLineLength);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
