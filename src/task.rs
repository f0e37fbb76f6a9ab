//! Task descriptors as published under `cluster/tasks/<name>` (SPEC_FULL.md
//! §3, §4.5, §6).

use std::collections::BTreeSet;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::label::Predicate;
use crate::node::KvEntry;

/// The cloud-app marker the core stamps onto every materialized descriptor
/// (SPEC_FULL.md §6) so the local registry can tell cloud apps apart from
/// locally defined ones.
pub const CLOUD_APP_MARKER: &str = "cloud";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskWire {
    content: Value,
    replication: u32,
    priority: i32,
    port: u32,
    condition: Predicate,
}

/// A scheduling unit: one named application, how many replicas it wants,
/// and which nodes are eligible to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    pub replication: u32,
    pub priority: i32,
    pub consul_service_port: u32,
    pub condition: Predicate,
    pub app_template: Value,
}

impl Task {
    /// The set of valid replica indices, `{1..=replication}`.
    pub fn task_index_set(&self) -> BTreeSet<u32> {
        (1..=self.replication).collect()
    }

    pub fn to_json(&self) -> String {
        let wire = TaskWire {
            content: self.app_template.clone(),
            replication: self.replication,
            priority: self.priority,
            port: self.consul_service_port,
            condition: self.condition.clone(),
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    pub fn from_json(name: &str, body: &str) -> Option<Self> {
        let wire: TaskWire = serde_json::from_str(body).ok()?;
        if wire.replication == 0 {
            return None;
        }
        Some(Task {
            name: name.to_string(),
            replication: wire.replication,
            priority: wire.priority,
            consul_service_port: wire.port,
            condition: wire.condition,
            app_template: wire.content,
        })
    }

    /// Builds the application descriptor handed to the local registry:
    /// the template augmented with `APP_INDEX` and stamped as cloud-managed.
    pub fn materialize(&self, index: u32) -> Value {
        let mut descriptor = self.app_template.clone();
        if let Value::Object(ref mut map) = descriptor {
            let env = map
                .entry("env")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(ref mut env_map) = env {
                env_map.insert("APP_INDEX".to_string(), Value::String(index.to_string()));
            }
            map.insert("metadata".to_string(), Value::String(CLOUD_APP_MARKER.to_string()));
        }
        descriptor
    }
}

use crate::kv::KvClient;

const TASKS_PATH: &str = "/v1/kv/appmesh/cluster/tasks";

/// Fetches every published task, keyed by name.
pub async fn retrieve_tasks(kv: &KvClient) -> std::collections::HashMap<String, Task> {
    let mut result = std::collections::HashMap::new();
    let resp = kv.get(TASKS_PATH, &[("recurse", "true")]).await;
    if !resp.is_success() {
        return result;
    }
    let entries: Vec<KvEntry> = match serde_json::from_str(&resp.body) {
        Ok(v) => v,
        Err(_) => return result,
    };
    for entry in entries {
        let Some(value) = entry.value else { continue };
        let Some(name) = entry.key.strip_prefix("appmesh/cluster/tasks/") else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let Ok(decoded) = STANDARD.decode(&value) else {
            continue;
        };
        let Ok(text) = String::from_utf8(decoded) else {
            continue;
        };
        if let Some(task) = Task::from_json(name, &text) {
            result.insert(name.to_string(), task);
        }
    }
    result
}
