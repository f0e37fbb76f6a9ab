//! Node convergence: reconciling local applications against this host's
//! topology (SPEC_FULL.md §4.7, §4.9).

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::kv::KvClient;
use crate::metrics::CONVERGENCE_ACTIONS_TOTAL;
use crate::task::Task;
use crate::topology::Topology;

/// Collaborator interface onto the local application engine. This core never
/// talks to a container runtime or process supervisor directly; it only
/// knows the shape of this trait, implemented elsewhere (SPEC_FULL.md §1
/// Non-goals: container/process lifecycle is out of scope).
#[async_trait]
pub trait LocalRegistry: Send + Sync {
    /// Names of applications currently flagged as cloud-managed.
    async fn cloud_app_names(&self) -> Vec<String>;
    /// The current descriptor for a cloud app, if it exists.
    async fn get(&self, name: &str) -> Option<Value>;
    /// Create or replace an application with the given descriptor.
    async fn add(&self, name: &str, descriptor: Value);
    /// Remove an application by name.
    async fn remove(&self, name: &str);
}

const TOPOLOGY_PATH: &str = "/v1/kv/appmesh/topology";

async fn fetch_my_topology(kv: &KvClient, host_name: &str) -> Topology {
    let path = format!("{}/{}", TOPOLOGY_PATH, host_name);
    let resp = kv.get(&path, &[]).await;
    if !resp.is_success() {
        warn!(host = %host_name, "topology fetch failed, converging to empty (fail-closed)");
        return Topology::new(host_name);
    }
    Topology::from_json(host_name, &resp.body).unwrap_or_else(|| Topology::new(host_name))
}

/// Runs one convergence pass: bring the local registry in line with this
/// host's slice of the topology.
pub async fn converge(
    kv: &KvClient,
    host_name: &str,
    proxy_url: &str,
    tasks: &std::collections::HashMap<String, Task>,
    registry: &dyn LocalRegistry,
) {
    let topology = fetch_my_topology(kv, host_name).await;

    for (app_name, index) in &topology.schedule_apps {
        let Some(task) = tasks.get(app_name) else {
            warn!(app = %app_name, "no task template found for scheduled app, skipping");
            continue;
        };
        let descriptor = task.materialize(*index);
        let existing = registry.get(app_name).await;
        let action = match &existing {
            None => Some("add"),
            Some(current) if current != &descriptor => Some("update"),
            Some(_) => None,
        };
        if let Some(action) = action {
            registry.add(app_name, descriptor).await;
            register_service(kv, host_name, proxy_url, app_name, task.consul_service_port).await;
            CONVERGENCE_ACTIONS_TOTAL.with_label_values(&[action]).inc();
            info!(app = %app_name, action, "converged cloud app");
        }
    }

    for name in registry.cloud_app_names().await {
        if !topology.schedule_apps.contains_key(&name) {
            registry.remove(&name).await;
            deregister_service(kv, host_name, &name).await;
            CONVERGENCE_ACTIONS_TOTAL.with_label_values(&["remove"]).inc();
            info!(app = %name, "removed cloud app no longer in topology");
        }
    }
}

/// Cleanly removes this host from the cluster: deletes its node and topology
/// keys, then tears down every locally running cloud app (SPEC_FULL.md §4.9).
pub async fn go_offline(kv: &KvClient, host_name: &str, registry: &dyn LocalRegistry) {
    crate::node::remove_node(kv, host_name).await;
    let path = format!("{}/{}", TOPOLOGY_PATH, host_name);
    let _ = kv.del(&path, &[]).await;

    for name in registry.cloud_app_names().await {
        registry.remove(&name).await;
        deregister_service(kv, host_name, &name).await;
    }
    info!(host = %host_name, "node offline sequence complete");
}

async fn register_service(kv: &KvClient, host: &str, proxy_url: &str, name: &str, port: u32) {
    if port == 0 {
        return;
    }
    let body = serde_json::json!({
        "ID": format!("{}:{}", host, name),
        "Name": name,
        "Address": host,
        "Port": port,
        "Check": {
            "HTTP": format!("{}/appmesh/app/{}/health", proxy_url, name),
            "Interval": "15s",
            "Timeout": "5s",
            "Method": "GET",
            "TLSSkipVerify": true,
        }
    });
    let _ = kv
        .put_json(
            "/v1/agent/service/register",
            &[("replace-existing-checks", "true")],
            &body,
        )
        .await;
}

async fn deregister_service(kv: &KvClient, host: &str, name: &str) {
    let path = format!("/v1/agent/service/deregister/{}:{}", host, name);
    let _ = kv.put(&path, &[], "").await;
}
