//! HTTP client for the coordination store's KV, session, and service-catalog
//! APIs (SPEC_FULL.md §4.1, §6).
//!
//! Mirrors the teacher project's `ConsulClient` in spirit — a thin `reqwest`
//! wrapper with certificate validation disabled by design — but generalized
//! to the generic GET/PUT/DELETE/watch surface the coordination client needs
//! rather than one fixed service-registration call.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::warn;

/// In-band "the store was unreachable" marker (HTTP 205, matching §4.1).
pub const STATUS_UNAVAILABLE: u16 = 205;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const WATCH_TIMEOUT: Duration = Duration::from_secs(30);
const WATCH_WAIT_MS: u64 = 30_000;

/// Result of a non-blocking KV GET: status code, raw body, and the store's
/// monotonic `X-Consul-Index`, if present.
#[derive(Debug, Clone)]
pub struct GetResponse {
    pub status: u16,
    pub body: String,
    pub index: u64,
}

impl GetResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Result of a watch iteration: did the index advance, and to what value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchResult {
    pub changed: bool,
    pub index: u64,
}

/// A single `(key, value)` query-string parameter.
pub type Query<'a> = &'a [(&'a str, &'a str)];

/// HTTP client bound to one coordination-store base URL.
///
/// Holds two `reqwest::Client`s: one with the short request timeout used by
/// ordinary GET/PUT/DELETE calls, and one with the 30s timeout used by the
/// blocking watch GET — the extra timeout budget is the whole point of a
/// watch, so it cannot share the short-timeout client.
pub struct KvClient {
    base_url: String,
    http: Client,
    watch_http: Client,
}

impl KvClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build KV HTTP client");
        let watch_http = Client::builder()
            .timeout(WATCH_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build KV watch HTTP client");

        Self {
            base_url,
            http,
            watch_http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn extract_index(resp: &reqwest::Response) -> u64 {
        resp.headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)
    }

    /// GET `path` with the given query parameters.
    pub async fn get(&self, path: &str, query: Query<'_>) -> GetResponse {
        let req = self.http.get(self.url(path)).query(query);
        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let index = Self::extract_index(&resp);
                let body = resp.text().await.unwrap_or_default();
                GetResponse { status, body, index }
            }
            Err(e) => {
                warn!(path = %path, error = %e, "KV GET failed");
                GetResponse {
                    status: STATUS_UNAVAILABLE,
                    body: String::new(),
                    index: 0,
                }
            }
        }
    }

    /// PUT `body` (pre-serialized JSON) to `path` with the given query parameters.
    pub async fn put(&self, path: &str, query: Query<'_>, body: &str) -> (u16, String) {
        let req = self
            .http
            .put(self.url(path))
            .query(query)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                (status, text)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "KV PUT failed");
                (STATUS_UNAVAILABLE, String::new())
            }
        }
    }

    /// PUT a JSON-serializable value.
    pub async fn put_json<T: serde::Serialize>(
        &self,
        path: &str,
        query: Query<'_>,
        value: &T,
    ) -> (u16, String) {
        match serde_json::to_string(value) {
            Ok(body) => self.put(path, query, &body).await,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to serialize KV PUT body");
                (STATUS_UNAVAILABLE, String::new())
            }
        }
    }

    /// DELETE `path`, returning the resulting status code.
    pub async fn del(&self, path: &str, query: Query<'_>) -> u16 {
        let req = self.http.delete(self.url(path)).query(query);
        match req.send().await {
            Ok(resp) => resp.status().as_u16(),
            Err(e) => {
                warn!(path = %path, error = %e, "KV DELETE failed");
                STATUS_UNAVAILABLE
            }
        }
    }

    /// Long-poll `path` for a change past `last_index`.
    ///
    /// Returns `(changed, new_index)`. `changed` is true when the call
    /// succeeded with 200 and the index is fresh; callers should update their
    /// `last_index` to the returned value whenever `changed` is true.
    pub async fn watch(&self, path: &str, last_index: u64, recurse: bool) -> WatchResult {
        let index_str = last_index.to_string();
        let wait_str = format!("{}ms", WATCH_WAIT_MS);
        let mut query: Vec<(&str, &str)> = vec![
            ("index", &index_str),
            ("wait", &wait_str),
            ("stale", "false"),
        ];
        if recurse {
            query.push(("recurse", "true"));
        }

        let req = self.watch_http.get(self.url(path)).query(&query);
        match req.send().await {
            Ok(resp) => {
                let success = resp.status() == StatusCode::OK;
                let index = Self::extract_index(&resp);
                let changed = success || (index != last_index && index > 0);
                WatchResult { changed, index: if changed { index } else { last_index } }
            }
            Err(_) => {
                // Blocking-query timeout or transport failure: not an error,
                // just "nothing changed yet" (SPEC_FULL.md §4.3 step 3).
                WatchResult {
                    changed: false,
                    index: last_index,
                }
            }
        }
    }

    /// Fetch just the current `X-Consul-Index` for `path` without waiting.
    pub async fn modify_index(&self, path: &str, recurse: bool) -> u64 {
        let query: Vec<(&str, &str)> = if recurse {
            vec![("recurse", "true")]
        } else {
            vec![]
        };
        self.get(path, &query).await.index
    }
}
