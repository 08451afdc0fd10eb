//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::framing::OversizeBodyPolicy;

/// Root configuration for the engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Stream listener settings.
    pub listener: ListenerConfig,

    /// Per-connection framing limits.
    pub framing: FramingConfig,

    /// Callback delivery settings.
    pub dispatch: DispatchConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5060").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5060".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Framing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FramingConfig {
    /// Largest message accepted, header block plus body. 0 disables the limit.
    pub max_message_size: usize,

    /// Starvation timer in milliseconds. 0 disables the timer.
    pub read_timeout_ms: u64,

    /// What to do with a body that does not fit the size limit.
    pub oversize_body: OversizeBodyPolicy,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_message_size: 65_536,
            read_timeout_ms: 32_000,
            oversize_body: OversizeBodyPolicy::Abandon,
        }
    }
}

/// Dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Worker threads for callbacks. 0 delivers inline on the connection task.
    pub worker_threads: usize,

    /// Watchdog threshold in milliseconds. 0 disables the watchdog.
    pub stuck_task_timeout_ms: u64,

    /// Worker thread name prefix.
    pub thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            stuck_task_timeout_ms: 0,
            thread_name: "sip-dispatch".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.listener.bind_address, "0.0.0.0:5060");
        assert_eq!(config.framing.max_message_size, 65_536);
        assert_eq!(config.dispatch.worker_threads, 0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [framing]
            oversize_body = "close"

            [dispatch]
            worker_threads = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.framing.oversize_body, OversizeBodyPolicy::Close);
        assert_eq!(config.framing.read_timeout_ms, 32_000);
        assert_eq!(config.dispatch.worker_threads, 8);
        assert_eq!(config.dispatch.thread_name, "sip-dispatch");
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let result: Result<EngineConfig, _> = toml::from_str("[framing]\noversize_body = \"keep\"\n");
        assert!(result.is_err());
    }
}
