//! Exercises leader election and the node-offline sequence against a mocked
//! coordination store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use clustermesh_core::convergence::{go_offline, LocalRegistry};
use clustermesh_core::election::{current_leader, try_acquire};
use clustermesh_core::kv::KvClient;
use clustermesh_core::session::SessionManager;
use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
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

#[tokio::test]
async fn session_then_election_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ID": "sess-1"})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/appmesh/leader"))
        .and(query_param("acquire", "sess-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/appmesh/leader"))
        .and(query_param("raw", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"n1\""))
        .mount(&server)
        .await;

    let kv = KvClient::new(server.uri());
    let session = SessionManager::new("n1", 30);
    let id = session.refresh(&kv).await.expect("session should be created");

    assert!(try_acquire(&kv, &id, "n1", 1000).await);
    assert_eq!(current_leader(&kv).await, Some("n1".to_string()));
}

#[tokio::test]
async fn offline_sequence_clears_node_topology_and_local_apps() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
    Mock::given(method("PUT")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let kv = KvClient::new(server.uri());
    let registry = FakeRegistry::default();
    registry.add("web", serde_json::json!({"name": "web"})).await;

    go_offline(&kv, "n1", &registry).await;

    assert!(registry.cloud_app_names().await.is_empty());
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().any(|r| r.method.to_string() == "DELETE" && r.url.path().contains("/cluster/nodes/n1")));
    assert!(requests.iter().any(|r| r.method.to_string() == "DELETE" && r.url.path().contains("/topology/n1")));
}
