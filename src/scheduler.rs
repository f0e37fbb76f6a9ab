//! Task placement (SPEC_FULL.md §4.5).
//!
//! Pure function of the current tasks, nodes, and previous topology; no I/O.
//! Deterministic given a stable input: the same inputs always produce the
//! same output topology, which keeps scheduling rounds idempotent and lets
//! the topology writer diff cheaply against the previous round.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::node::Node;
use crate::task::Task;
use crate::topology::Topology;

/// Runs one scheduling round and returns the new topology, keyed by host.
///
/// Hosts with no apps assigned are omitted, per §4.5 step 3 ("serialized as
/// absent rather than empty").
pub fn schedule(
    tasks: &HashMap<String, Task>,
    nodes: &HashMap<String, Node>,
    prev: &HashMap<String, Topology>,
) -> HashMap<String, Topology> {
    let mut new_topology: BTreeMap<String, Topology> = nodes
        .keys()
        .map(|host| (host.clone(), Topology::new(host.clone())))
        .collect();

    for task in ordered_tasks(tasks) {
        let matched = matched_hosts(task, nodes);
        if matched.is_empty() {
            warn!(task = %task.name, "no matching hosts for task");
            continue;
        }
        if matched.len() < task.replication as usize {
            warn!(
                task = %task.name,
                matched = matched.len(),
                replication = task.replication,
                "under-replicated: fewer matching hosts than requested replicas"
            );
        }

        let mut used_indices: std::collections::BTreeSet<u32> = Default::default();
        let mut placed_hosts: std::collections::BTreeSet<&str> = Default::default();
        let mut remaining = task.replication as usize;

        // Step a/b: carry over sticky placements, preferring least-loaded hosts.
        let mut sticky: Vec<(&str, u32)> = matched
            .iter()
            .filter_map(|&host| {
                prev.get(host)
                    .and_then(|t| t.schedule_apps.get(&task.name))
                    .filter(|&&idx| task.task_index_set().contains(&idx))
                    .map(|&idx| (host, idx))
            })
            .collect();
        sticky.sort_by_key(|&(host, _)| (new_topology[host].schedule_apps.len(), host.to_string()));

        for (host, index) in sticky {
            if remaining == 0 {
                break;
            }
            new_topology
                .get_mut(host)
                .unwrap()
                .schedule_apps
                .insert(task.name.clone(), index);
            used_indices.insert(index);
            placed_hosts.insert(host);
            remaining -= 1;
        }

        // Step c: fill remaining replicas from unplaced matched hosts, least
        // loaded first, tiebroken by ascending hostname.
        let mut candidates: Vec<&str> = matched
            .into_iter()
            .filter(|h| !placed_hosts.contains(h))
            .collect();
        candidates.sort_by_key(|&host| (new_topology[host].schedule_apps.len(), host.to_string()));

        for host in candidates {
            if remaining == 0 {
                break;
            }
            let index = task
                .task_index_set()
                .into_iter()
                .find(|i| !used_indices.contains(i))
                .expect("task_index_set has replication entries and used_indices is smaller");
            new_topology
                .get_mut(host)
                .unwrap()
                .schedule_apps
                .insert(task.name.clone(), index);
            used_indices.insert(index);
            remaining -= 1;
        }
    }

    new_topology
        .into_iter()
        .filter(|(_, topology)| !topology.is_empty())
        .collect()
}

/// Task iteration order: descending priority, then ascending name.
fn ordered_tasks(tasks: &HashMap<String, Task>) -> Vec<&Task> {
    let mut ordered: Vec<&Task> = tasks.values().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    ordered
}

fn matched_hosts<'a>(task: &Task, nodes: &'a HashMap<String, Node>) -> Vec<&'a str> {
    let mut hosts: Vec<&str> = nodes
        .iter()
        .filter(|(_, node)| node.label.matches(&task.condition))
        .map(|(host, _)| host.as_str())
        .collect();
    hosts.sort();
    hosts
}
