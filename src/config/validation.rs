//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, limits and names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::EngineConfig;

/// Lower bound for a non-zero `framing.max_message_size`.
pub const MIN_MESSAGE_SIZE: usize = 16;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `listener.bind_address`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    let size = config.framing.max_message_size;
    if size != 0 && size < MIN_MESSAGE_SIZE {
        errors.push(ValidationError::new(
            "framing.max_message_size",
            format!("must be 0 (unlimited) or at least {MIN_MESSAGE_SIZE} bytes, got {size}"),
        ));
    }

    if config.dispatch.thread_name.trim().is_empty() {
        errors.push(ValidationError::new("dispatch.thread_name", "must not be empty"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = EngineConfig::default();
        config.listener.bind_address = "not-an-address".to_string();
        config.listener.max_connections = 0;
        config.framing.max_message_size = 10;
        config.dispatch.thread_name = "  ".to_string();
        config.observability.log_level = "loud".to_string();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "listener.bind_address",
                "listener.max_connections",
                "framing.max_message_size",
                "dispatch.thread_name",
                "observability.log_level",
                "observability.metrics_address",
            ]
        );
    }

    #[test]
    fn unlimited_message_size_is_valid() {
        let mut config = EngineConfig::default();
        config.framing.max_message_size = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn metrics_address_ignored_when_disabled() {
        let mut config = EngineConfig::default();
        config.observability.metrics_address = "nowhere".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let mut config = EngineConfig::default();
        config.observability.log_level = "DEBUG".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
