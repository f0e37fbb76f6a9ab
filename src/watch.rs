//! Generic long-poll watch loop (SPEC_FULL.md §4.3).
//!
//! A watch repeatedly long-polls one KV path and invokes a callback whenever
//! the store's modify-index advances. It backs off 3s on an unchanged /
//! unreachable response and exits once `should_run` goes false.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::kv::KvClient;

const BACKOFF: Duration = Duration::from_secs(3);

/// Shared flag a watch checks each iteration to know whether it should keep
/// running (mirrors the role flags in §4.3: `security`, node, master).
#[derive(Clone, Default)]
pub struct WatchGate(Arc<AtomicBool>);

impl WatchGate {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

/// Runs a watch loop against `path` until `gate` is disabled.
///
/// `on_change` is awaited synchronously (per §4.3, "call `onChange()`
/// synchronously") before the next iteration begins, so a slow sync callback
/// naturally throttles the watch rather than overlapping with itself.
pub async fn run_watch<F, Fut>(
    kv: &KvClient,
    path: &str,
    recurse: bool,
    gate: &WatchGate,
    mut on_change: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut last_index = kv.modify_index(path, recurse).await;
    on_change().await;

    while gate.is_enabled() {
        let result = kv.watch(path, last_index, recurse).await;
        if result.changed {
            last_index = result.index;
            on_change().await;
        } else {
            debug!(path = %path, "watch unchanged, backing off");
            tokio::time::sleep(BACKOFF).await;
        }
    }
}
