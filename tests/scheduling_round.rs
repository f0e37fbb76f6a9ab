//! End-to-end exercise of one scheduling round against a mocked coordination
//! store: publish nodes and tasks, run the scheduler, write the resulting
//! topology, then converge a node against its slice of it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use clustermesh_core::convergence::{converge, LocalRegistry};
use clustermesh_core::kv::KvClient;
use clustermesh_core::label::{Label, Predicate};
use clustermesh_core::node::Node;
use clustermesh_core::scheduler::schedule;
use clustermesh_core::task::Task;
use clustermesh_core::topology_writer::write_diff;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct FakeRegistry {
    apps: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl LocalRegistry for FakeRegistry {
    async fn cloud_app_names(&self) -> Vec<String> {
        self.apps.lock().unwrap().keys().cloned().collect()
    }
    async fn get(&self, name: &str) -> Option<Value> {
        self.apps.lock().unwrap().get(name).cloned()
    }
    async fn add(&self, name: &str, descriptor: Value) {
        self.apps.lock().unwrap().insert(name.to_string(), descriptor);
    }
    async fn remove(&self, name: &str) {
        self.apps.lock().unwrap().remove(name);
    }
}

fn node(host: &str) -> Node {
    Node {
        host_name: host.to_string(),
        label: Label::default(),
        appmesh_proxy_url: format!("https://{host}:6060"),
        resource: Default::default(),
    }
}

#[tokio::test]
async fn scheduling_round_converges_into_local_registry() {
    let nodes: HashMap<_, _> = ["n1", "n2"].iter().map(|h| (h.to_string(), node(h))).collect();
    let tasks: HashMap<_, _> = [(
        "web".to_string(),
        Task {
            name: "web".to_string(),
            replication: 2,
            priority: 0,
            consul_service_port: 0,
            condition: Predicate::always(),
            app_template: serde_json::json!({"name": "web"}),
        },
    )]
    .into_iter()
    .collect();

    let new_topology = schedule(&tasks, &nodes, &HashMap::new());
    assert_eq!(new_topology.len(), 2);

    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let kv = KvClient::new(server.uri());
    write_diff(&kv, &HashMap::new(), &new_topology, 1).await;

    // Converge n1 against the serialized topology the scheduler produced.
    let n1_topology = new_topology["n1"].to_json();
    Mock::given(method("GET"))
        .and(path("/v1/kv/appmesh/topology/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(n1_topology))
        .mount(&server)
        .await;

    let registry = FakeRegistry::default();
    converge(&kv, "n1", "https://n1:6060", &tasks, &registry).await;

    assert!(registry.get("web").await.is_some());
}

#[tokio::test]
async fn under_replicated_task_still_schedules_available_hosts() {
    let nodes: HashMap<_, _> = [("solo".to_string(), node("solo"))].into_iter().collect();
    let tasks: HashMap<_, _> = [(
        "db".to_string(),
        Task {
            name: "db".to_string(),
            replication: 3,
            priority: 0,
            consul_service_port: 0,
            condition: Predicate::always(),
            app_template: serde_json::json!({}),
        },
    )]
    .into_iter()
    .collect();

    let result = schedule(&tasks, &nodes, &HashMap::new());
    assert_eq!(result["solo"].schedule_apps.len(), 1);
}
