//! Diffs and publishes scheduling rounds (SPEC_FULL.md §4.6).

use std::collections::HashMap;

use tracing::info;

use crate::kv::KvClient;
use crate::metrics::TOPOLOGY_WRITES_TOTAL;
use crate::topology::Topology;

const TOPOLOGY_PATH: &str = "/v1/kv/appmesh/topology";

/// Writes the diff between `old` and `new` topology maps.
///
/// New or changed hosts get a PUT with the serialized topology. Hosts present
/// in `old` but absent from `new` get a PUT-empty rather than a DELETE — the
/// offline sequence (§4.9) is the only place that deletes a topology key,
/// since this path assumes the host is still reachable and will read it
/// again.
pub async fn write_diff(kv: &KvClient, old: &HashMap<String, Topology>, new: &HashMap<String, Topology>, now_millis: u64) {
    let flags = now_millis.to_string();

    for (host, topology) in new {
        let changed = match old.get(host) {
            Some(prev) => prev != topology,
            None => true,
        };
        if changed {
            put_topology(kv, host, topology, &flags).await;
            TOPOLOGY_WRITES_TOTAL.with_label_values(&["changed"]).inc();
        }
    }

    for host in old.keys() {
        if !new.contains_key(host) {
            let empty = Topology::new(host.clone());
            put_topology(kv, host, &empty, &flags).await;
            TOPOLOGY_WRITES_TOTAL.with_label_values(&["removed"]).inc();
        }
    }
}

async fn put_topology(kv: &KvClient, host: &str, topology: &Topology, flags: &str) {
    let path = format!("{}/{}", TOPOLOGY_PATH, host);
    let body = topology.to_json();
    let (status, _) = kv.put(&path, &[("flags", flags)], &body).await;
    if status == 200 {
        info!(host = %host, apps = topology.schedule_apps.len(), "topology written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn topology(host: &str, apps: &[(&str, u32)]) -> Topology {
        Topology {
            host_name: host.to_string(),
            schedule_apps: apps.iter().map(|(a, i)| (a.to_string(), *i)).collect(),
        }
    }

    #[tokio::test]
    async fn writes_new_and_changed_hosts() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/appmesh/topology/n1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let kv = KvClient::new(server.uri());
        let old = HashMap::new();
        let mut new = HashMap::new();
        new.insert("n1".to_string(), topology("n1", &[("web", 1)]));

        write_diff(&kv, &old, &new, 1000).await;
    }

    #[tokio::test]
    async fn writes_empty_body_for_removed_host() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/appmesh/topology/n1"))
            .and(body_json(serde_json::json!([])))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let kv = KvClient::new(server.uri());
        let mut old = HashMap::new();
        old.insert("n1".to_string(), topology("n1", &[("web", 1)]));
        let new = HashMap::new();

        write_diff(&kv, &old, &new, 1000).await;
    }

    #[tokio::test]
    async fn skips_unchanged_hosts() {
        let server = MockServer::start().await;
        // No mock mounted: if a PUT is attempted, wiremock returns 404 but
        // does not fail the test by itself, so assert no request was made.
        let kv = KvClient::new(server.uri());
        let mut old = HashMap::new();
        old.insert("n1".to_string(), topology("n1", &[("web", 1)]));
        let mut new = HashMap::new();
        new.insert("n1".to_string(), topology("n1", &[("web", 2)])); // index-only change

        write_diff(&kv, &old, &new, 1000).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }
}
