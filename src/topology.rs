//! Per-host topology: which apps run where (SPEC_FULL.md §3, §6).

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::kv::KvClient;
use crate::node::KvEntry;

const TOPOLOGY_PATH: &str = "/v1/kv/appmesh/topology";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopologyEntryWire {
    app: String,
    index: u32,
}

/// The set of applications scheduled onto one host, with their replica index.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub host_name: String,
    pub schedule_apps: BTreeMap<String, u32>,
}

impl Topology {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            schedule_apps: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.schedule_apps.is_empty()
    }

    pub fn to_json(&self) -> String {
        let wire: Vec<TopologyEntryWire> = self
            .schedule_apps
            .iter()
            .map(|(app, index)| TopologyEntryWire {
                app: app.clone(),
                index: *index,
            })
            .collect();
        serde_json::to_string(&wire).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(host_name: &str, body: &str) -> Option<Self> {
        if body.trim().is_empty() {
            return Some(Topology::new(host_name));
        }
        let wire: Vec<TopologyEntryWire> = serde_json::from_str(body).ok()?;
        let schedule_apps = wire.into_iter().map(|e| (e.app, e.index)).collect();
        Some(Topology {
            host_name: host_name.to_string(),
            schedule_apps,
        })
    }

    /// The set of app names on this host, used for name-set equality.
    pub fn app_names(&self) -> std::collections::BTreeSet<&str> {
        self.schedule_apps.keys().map(String::as_str).collect()
    }
}

impl PartialEq for Topology {
    /// Two topologies are equal iff their app name sets match, per
    /// SPEC_FULL.md §3: "index changes are tolerated to reduce churn".
    fn eq(&self, other: &Self) -> bool {
        self.app_names() == other.app_names()
    }
}

/// Fetches every host's topology, used to build the scheduler's previous-round
/// snapshot (SPEC_FULL.md §4.5).
pub async fn retrieve_all(kv: &KvClient) -> std::collections::HashMap<String, Topology> {
    let mut result = std::collections::HashMap::new();
    let resp = kv.get(TOPOLOGY_PATH, &[("recurse", "true")]).await;
    if !resp.is_success() {
        return result;
    }
    let entries: Vec<KvEntry> = match serde_json::from_str(&resp.body) {
        Ok(v) => v,
        Err(_) => return result,
    };
    for entry in entries {
        let Some(value) = entry.value else { continue };
        let Some(host) = entry.key.strip_prefix("appmesh/topology/") else {
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
        if let Some(topology) = Topology::from_json(host, &text) {
            result.insert(host.to_string(), topology);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(pairs: &[(&str, u32)]) -> Topology {
        Topology {
            host_name: "n1".to_string(),
            schedule_apps: pairs.iter().map(|(a, i)| (a.to_string(), *i)).collect(),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let t = topology(&[("web", 1), ("db", 2)]);
        let json = t.to_json();
        let parsed = Topology::from_json("n1", &json).unwrap();
        assert_eq!(parsed.schedule_apps, t.schedule_apps);
    }

    #[test]
    fn empty_body_parses_as_empty_topology() {
        let t = Topology::from_json("n1", "").unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn equality_ignores_index_differences() {
        let a = topology(&[("web", 1)]);
        let b = topology(&[("web", 2)]);
        assert_eq!(a, b);
    }

    #[test]
    fn equality_is_sensitive_to_name_set() {
        let a = topology(&[("web", 1)]);
        let b = topology(&[("web", 1), ("db", 1)]);
        assert_ne!(a, b);
    }
}
