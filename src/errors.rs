//! Error taxonomy for the coordination core (see SPEC_FULL.md §7).
//!
//! Call sites distinguish four kinds of failure: `Transient` (retry on the
//! next tick), `Precondition` (not yet ready — no session, not leader),
//! `Protocol` (malformed data from the store — skip the record), and `Fatal`
//! (invalid configuration at startup — abort).

use thiserror::Error;

/// Errors raised by the coordination client, scheduler, and convergence loop.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("transient failure talking to the coordination store: {0}")]
    Transient(String),

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("malformed data at {path}: {message}")]
    Protocol { path: String, message: String },

    #[error("fatal configuration error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        CoreError::Precondition(msg.into())
    }

    pub fn protocol(path: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Protocol {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for failures the caller should retry on its next watch/timer tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    /// True for failures that should silently short-circuit the operation.
    pub fn is_precondition(&self) -> bool {
        matches!(self, CoreError::Precondition(_))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Protocol {
            path: String::new(),
            message: err.to_string(),
        }
    }
}

/// Configuration-loading errors. Always fatal — handled once at startup,
/// never by the retry policy that governs [`CoreError`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("session TTL ({ttl}s) must exceed 10s when CONSUL_IS_MASTER or CONSUL_IS_NODE is set")]
    TtlTooLow { ttl: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_detected() {
        let e = CoreError::transient("timeout");
        assert!(e.is_transient());
        assert!(!e.is_precondition());
    }

    #[test]
    fn precondition_is_detected() {
        let e = CoreError::precondition("no session");
        assert!(e.is_precondition());
        assert!(!e.is_transient());
    }

    #[test]
    fn protocol_error_carries_path() {
        let e = CoreError::protocol("cluster/tasks/web", "missing replication field");
        match e {
            CoreError::Protocol { path, .. } => assert_eq!(path, "cluster/tasks/web"),
            _ => panic!("expected Protocol variant"),
        }
    }

    #[test]
    fn display_messages_are_descriptive() {
        let e = CoreError::Fatal("CONSUL_URL is not a valid URL".to_string());
        assert!(e.to_string().contains("fatal configuration error"));
    }
}
