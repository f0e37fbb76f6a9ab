//! Node descriptor and publication (SPEC_FULL.md §3, §4, §6).

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::kv::KvClient;
use crate::label::Label;

/// A node's resource snapshot, as published under `cluster/nodes/<host>`.
///
/// Sampling CPU/memory is an external concern (SPEC_FULL.md §1 Non-goals);
/// this struct only carries whatever numbers the caller already sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub cpu_cores: u32,
    pub mem_total_bytes: u64,
    pub mem_free_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NodeWire {
    appmesh: String,
    label: Label,
    resource: Resource,
}

/// A node descriptor: the KV-level view of one agent's capacity and tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub host_name: String,
    pub label: Label,
    pub appmesh_proxy_url: String,
    pub resource: Resource,
}

/// Collaborator onto the host's CPU/memory probes. Sampling itself is an
/// external concern (SPEC_FULL.md §1 Non-goals); this core only needs the
/// numbers to stamp into the published node descriptor.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Resource;
}

impl Node {
    pub fn to_json(&self) -> String {
        let wire = NodeWire {
            appmesh: self.appmesh_proxy_url.clone(),
            label: self.label.clone(),
            resource: self.resource,
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    pub fn from_json(host_name: &str, body: &str) -> Option<Self> {
        let wire: NodeWire = serde_json::from_str(body).ok()?;
        Some(Node {
            host_name: host_name.to_string(),
            label: wire.label,
            appmesh_proxy_url: wire.appmesh,
            resource: wire.resource,
        })
    }
}

const NODES_PATH: &str = "/v1/kv/appmesh/cluster/nodes";

/// Publishes this node's descriptor under `cluster/nodes/<host>`, guarded by
/// the current session (ephemeral: removed when the session expires).
pub async fn report_node(kv: &KvClient, session_id: &str, node: &Node) -> bool {
    if session_id.is_empty() {
        return false;
    }
    let path = format!("{}/{}", NODES_PATH, node.host_name);
    let body = node.to_json();
    let (status, result) = kv.put(&path, &[("acquire", session_id)], &body).await;
    if status == 200 && result.trim() == "true" {
        info!(host = %node.host_name, "node descriptor published");
        true
    } else {
        warn!(host = %node.host_name, status, "node descriptor publish failed");
        false
    }
}

/// Removes this node's descriptor, used during the offline sequence (§4.9).
pub async fn remove_node(kv: &KvClient, host_name: &str) {
    let path = format!("{}/{}", NODES_PATH, host_name);
    let _ = kv.del(&path, &[]).await;
}

/// Retrieves every published node, keyed by host name.
///
/// Used by the leader to build the scheduling snapshot. The coordination
/// store's KV recurse listing wraps each entry in an envelope with
/// `Key`/`Value` (base64); callers that already have decoded entries can
/// build a `HashMap<String, Node>` directly via [`Node::from_json`].
pub async fn retrieve_nodes(kv: &KvClient) -> HashMap<String, Node> {
    let mut result = HashMap::new();
    let resp = kv.get(NODES_PATH, &[("recurse", "true")]).await;
    if !resp.is_success() {
        return result;
    }
    let entries: Vec<KvEntry> = match serde_json::from_str(&resp.body) {
        Ok(v) => v,
        Err(_) => return result,
    };
    for entry in entries {
        let Some(value) = entry.value else { continue };
        let Some(host) = entry.key.strip_prefix("appmesh/cluster/nodes/") else {
            continue;
        };
        if host.is_empty() {
            continue;
        }
        let Ok(decoded) = STANDARD.decode(&value) else {
            continue;
        };
        let Ok(text) = String::from_utf8(decoded) else {
            continue;
        };
        if let Some(node) = Node::from_json(host, &text) {
            result.insert(host.to_string(), node);
        }
    }
    result
}

/// One entry of a Consul-style recursive KV listing.
#[derive(Debug, Deserialize)]
pub struct KvEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: Option<String>,
    #[serde(rename = "ModifyIndex", default)]
    pub modify_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_node() -> Node {
        Node {
            host_name: "n1".to_string(),
            label: Label::from_kv_string("zone=a"),
            appmesh_proxy_url: "https://n1:6060".to_string(),
            resource: Resource {
                cpu_cores: 4,
                mem_total_bytes: 1000,
                mem_free_bytes: 500,
            },
        }
    }

    #[test]
    fn round_trips_through_json() {
        let node = sample_node();
        let json = node.to_json();
        let parsed = Node::from_json("n1", &json).unwrap();
        assert_eq!(parsed, node);
    }

    #[tokio::test]
    async fn report_node_requires_a_session() {
        let kv = KvClient::new("http://127.0.0.1:1");
        let published = report_node(&kv, "", &sample_node()).await;
        assert!(!published);
    }

    #[tokio::test]
    async fn report_node_publishes_with_acquire_query() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/appmesh/cluster/nodes/n1"))
            .and(query_param("acquire", "sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .mount(&server)
            .await;

        let kv = KvClient::new(server.uri());
        let published = report_node(&kv, "sess-1", &sample_node()).await;
        assert!(published);
    }

    #[tokio::test]
    async fn retrieve_nodes_decodes_base64_entries() {
        let server = MockServer::start().await;
        let node = sample_node();
        let encoded = STANDARD.encode(node.to_json());
        Mock::given(method("GET"))
            .and(path("/v1/kv/appmesh/cluster/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"Key": "appmesh/cluster/nodes/n1", "Value": encoded, "ModifyIndex": 5}
            ])))
            .mount(&server)
            .await;

        let kv = KvClient::new(server.uri());
        let nodes = retrieve_nodes(&kv).await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes["n1"], node);
    }
}
