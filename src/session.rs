//! Session lifecycle (SPEC_FULL.md §4.2).
//!
//! Creates a TTL session bound to this agent, renews it on a timer, and
//! clears it on any failure so the next renew recreates it from scratch.

use std::sync::Mutex;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::kv::KvClient;

const LOCK_DELAY: &str = "15s";

#[derive(Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct SessionRenewEntry {
    #[serde(rename = "ID")]
    id: String,
}

/// Owns the current session id and knows how to (re)create and renew it.
pub struct SessionManager {
    host_name: String,
    ttl_seconds: u64,
    session_id: Mutex<Option<String>>,
}

impl SessionManager {
    pub fn new(host_name: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            host_name: host_name.into(),
            ttl_seconds,
            session_id: Mutex::new(None),
        }
    }

    /// The current session id, if one is live.
    pub fn current(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    fn set(&self, id: Option<String>) {
        *self.session_id.lock().unwrap() = id;
    }

    /// Create-or-renew the session, per §4.2's `refresh()`.
    ///
    /// Returns the live session id on success; clears and returns `None` on
    /// any failure (the caller is expected to try again on the next tick).
    pub async fn refresh(&self, kv: &KvClient) -> Option<String> {
        let existing = self.current();
        let result = match existing {
            None => self.create(kv).await,
            Some(id) => self.renew(kv, &id).await,
        };

        match result {
            Ok(id) => {
                self.set(Some(id.clone()));
                Some(id)
            }
            Err(e) => {
                warn!(host = %self.host_name, error = %e, "session refresh failed, clearing session id");
                self.set(None);
                None
            }
        }
    }

    async fn create(&self, kv: &KvClient) -> Result<String, CoreError> {
        let body = json!({
            "LockDelay": LOCK_DELAY,
            "Name": format!("appmesh-lock-{}", self.host_name),
            "Behavior": "delete",
            "TTL": format!("{}s", self.ttl_seconds),
        });
        let (status, body) = kv.put_json("/v1/session/create", &[], &body).await;
        if status != 200 {
            return Err(CoreError::transient(format!(
                "session create returned status {status}"
            )));
        }
        let parsed: SessionCreateResponse = serde_json::from_str(&body)?;
        info!(host = %self.host_name, session = %parsed.id, "session created");
        Ok(parsed.id)
    }

    async fn renew(&self, kv: &KvClient, id: &str) -> Result<String, CoreError> {
        let path = format!("/v1/session/renew/{}", id);
        let (status, body) = kv.put(&path, &[], "").await;
        if status != 200 {
            return Err(CoreError::transient(format!(
                "session renew returned status {status}"
            )));
        }
        let parsed: Vec<SessionRenewEntry> = serde_json::from_str(&body)?;
        parsed
            .into_iter()
            .next()
            .map(|e| e.id)
            .ok_or_else(|| CoreError::protocol(path, "renew response had no entries"))
    }

    /// Best-effort destroy of `id` at the store, used on clean shutdown.
    pub async fn release(&self, kv: &KvClient, id: &str) {
        if id.is_empty() {
            return;
        }
        let path = format!("/v1/session/destroy/{}", id);
        let _ = kv.put(&path, &[], "").await;
        info!(session = %id, "session released");
    }
}
