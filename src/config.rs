//! Agent configuration, loaded from environment variables (SPEC_FULL.md §10.1).
//!
//! Reading config *files* is an external concern; this module only covers the
//! handful of settings the coordination core needs about its own agent —
//! feature flags, role flags, the session TTL, and how to reach the store.

use std::env;

use crate::errors::ConfigError;
use crate::label::Label;

/// Helper to parse an environment variable with a default value.
fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(default)
}

/// Runtime configuration for one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Whether the coordination store integration is enabled at all.
    pub consul_enabled: bool,
    /// Whether the security document sync is enabled.
    pub consul_security_enabled: bool,
    /// May this agent win leader election and schedule tasks.
    pub is_master: bool,
    /// May this agent run scheduled applications.
    pub is_node: bool,
    /// Session TTL in seconds; must exceed 10 for renewal to be scheduled.
    pub ttl_seconds: u64,
    /// This agent's stable host identity, used as its KV key and in session naming.
    pub host_name: String,
    /// Base URL of the coordination store, e.g. `http://127.0.0.1:8500`.
    pub consul_url: String,
    /// This agent's externally reachable health-check base URL.
    pub appmesh_url: String,
    /// This node's published label set.
    pub label: Label,
    /// Bind address for the `/health` and `/metrics` HTTP endpoints.
    pub metrics_addr: String,
}

impl AgentConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host_name = env::var("CONSUL_NODE_ID")
            .unwrap_or_else(|_| env::var("HOSTNAME").unwrap_or_else(|_| "unknown-node".to_string()));

        let config = AgentConfig {
            consul_enabled: env_bool("CONSUL_ENABLED", false),
            consul_security_enabled: env_bool("CONSUL_SECURITY_ENABLED", false),
            is_master: env_bool("CONSUL_IS_MASTER", false),
            is_node: env_bool("CONSUL_IS_NODE", false),
            ttl_seconds: env_parse_or("CONSUL_SESSION_TTL", 30u64)?,
            host_name,
            consul_url: env::var("CONSUL_URL").unwrap_or_else(|_| "http://127.0.0.1:8500".to_string()),
            appmesh_url: env::var("APPMESH_URL").unwrap_or_else(|_| "http://127.0.0.1:6060".to_string()),
            label: Label::from_kv_string(&env::var("CONSUL_LABELS").unwrap_or_default()),
            metrics_addr: env::var("METRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:9090".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if (self.is_master || self.is_node) && self.ttl_seconds <= 10 {
            return Err(ConfigError::TtlTooLow {
                ttl: self.ttl_seconds,
            });
        }
        Ok(())
    }

    /// Whether a session-renewal timer should be scheduled at all (§4.2/§10).
    pub fn renewal_enabled(&self) -> bool {
        self.ttl_seconds > 10 && (self.is_master || self.is_node)
    }

    /// The renew period: `TTL - 3` seconds.
    pub fn renew_period_secs(&self) -> u64 {
        self.ttl_seconds.saturating_sub(3)
    }

    /// A config suitable for unit/integration tests — cluster features disabled.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        AgentConfig {
            consul_enabled: true,
            consul_security_enabled: true,
            is_master: true,
            is_node: true,
            ttl_seconds: 30,
            host_name: "test-host".to_string(),
            consul_url: "http://127.0.0.1:8500".to_string(),
            appmesh_url: "http://127.0.0.1:6060".to_string(),
            label: Label::default(),
            metrics_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_enabled_requires_ttl_over_ten_and_a_role() {
        let mut cfg = AgentConfig::for_testing();
        cfg.ttl_seconds = 30;
        assert!(cfg.renewal_enabled());

        cfg.ttl_seconds = 10;
        assert!(!cfg.renewal_enabled());

        cfg.ttl_seconds = 30;
        cfg.is_master = false;
        cfg.is_node = false;
        assert!(!cfg.renewal_enabled());
    }

    #[test]
    fn renew_period_is_ttl_minus_three() {
        let mut cfg = AgentConfig::for_testing();
        cfg.ttl_seconds = 30;
        assert_eq!(cfg.renew_period_secs(), 27);
    }

    #[test]
    fn validate_rejects_low_ttl_when_role_active() {
        let mut cfg = AgentConfig::for_testing();
        cfg.ttl_seconds = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_allows_low_ttl_when_plain_agent() {
        let mut cfg = AgentConfig::for_testing();
        cfg.ttl_seconds = 5;
        cfg.is_master = false;
        cfg.is_node = false;
        assert!(cfg.validate().is_ok());
    }
}
