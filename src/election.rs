//! Leader election (SPEC_FULL.md §4.4).
//!
//! Leadership is a session-backed lock on a single `leader` key. Acquiring
//! the lock is a single PUT; losing the session (expiry, network partition)
//! silently drops leadership the next time the lock is checked.

use tracing::info;

use crate::kv::KvClient;

const LEADER_PATH: &str = "/v1/kv/appmesh/leader";

/// Attempts to acquire (or keep) leadership using `session_id`.
///
/// `now_millis` becomes the `flags` query parameter, a free-form timestamp
/// used only for observability of when leadership last changed hands; it has
/// no bearing on the lock semantics.
pub async fn try_acquire(kv: &KvClient, session_id: &str, host_name: &str, now_millis: u64) -> bool {
    if session_id.is_empty() {
        return false;
    }
    let flags = now_millis.to_string();
    let request_body = serde_json::to_string(host_name).unwrap_or_default();
    let (status, body) = kv
        .put(
            LEADER_PATH,
            &[("acquire", session_id), ("flags", &flags)],
            &request_body,
        )
        .await;
    let acquired = status == 200 && body.trim() == "true";
    if acquired {
        info!(host = %host_name, "acquired leadership");
    }
    acquired
}

/// Reads the current leader's hostname, if any is held.
pub async fn current_leader(kv: &KvClient) -> Option<String> {
    let resp = kv.get(LEADER_PATH, &[("raw", "true")]).await;
    if !resp.is_success() || resp.body.is_empty() {
        return None;
    }
    Some(resp.body.trim_matches('"').to_string())
}
