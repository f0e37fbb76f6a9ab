//! Agent orchestration: wires the session, election, scheduler, convergence,
//! and security modules into the watch loops described in SPEC_FULL.md §4.3
//! and §5.
//!
//! Mirrors the teacher project's cluster-handle shape — one struct owning
//! `Arc`-shared collaborators, spawned onto the runtime as independent
//! tasks — generalized from a single health-reporting loop to the three
//! watch loops this domain needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::convergence::LocalRegistry;
use crate::kv::KvClient;
use crate::metrics::{HAS_SESSION, IS_LEADER, KV_CALLS_TOTAL, SCHEDULING_ROUNDS_TOTAL};
use crate::node::{Node, ResourceSampler};
use crate::security::SecuritySink;
use crate::session::SessionManager;
use crate::watch::{run_watch, WatchGate};
use crate::{election, node, scheduler, task, topology, topology_writer};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns every long-lived collaborator for one agent process.
pub struct Agent {
    config: AgentConfig,
    kv: Arc<KvClient>,
    session: Arc<SessionManager>,
    is_leader: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    schedule_mutex: Arc<AsyncMutex<()>>,
    security_gate: WatchGate,
    topology_gate: WatchGate,
    schedule_gate: WatchGate,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let kv = Arc::new(KvClient::new(config.consul_url.clone()));
        let session = Arc::new(SessionManager::new(config.host_name.clone(), config.ttl_seconds));
        Self {
            security_gate: WatchGate::new(config.consul_security_enabled),
            topology_gate: WatchGate::new(config.is_node),
            schedule_gate: WatchGate::new(config.is_master),
            config,
            kv,
            session,
            is_leader: Arc::new(AtomicBool::new(false)),
            healthy: Arc::new(AtomicBool::new(true)),
            schedule_mutex: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn healthy_flag(&self) -> Arc<AtomicBool> {
        self.healthy.clone()
    }

    /// Spawns the session-renewal timer and the enabled watch loops, and
    /// returns their join handles so the caller can await a clean shutdown.
    pub fn spawn(
        &self,
        registry: Arc<dyn LocalRegistry>,
        security_sink: Arc<dyn SecuritySink>,
        resource_sampler: Arc<dyn ResourceSampler>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.config.renewal_enabled() {
            handles.push(self.spawn_renewal_timer());
        }
        if self.config.consul_security_enabled {
            handles.push(self.spawn_security_watch(security_sink));
        }
        if self.config.is_node {
            handles.push(self.spawn_node_report_loop(resource_sampler));
            handles.push(self.spawn_topology_watch(registry));
        }
        if self.config.is_master {
            handles.push(self.spawn_schedule_watch());
        }

        handles
    }

    fn spawn_renewal_timer(&self) -> JoinHandle<()> {
        let kv = self.kv.clone();
        let session = self.session.clone();
        let period = std::time::Duration::from_secs(self.config.renew_period_secs());
        tokio::spawn(async move {
            loop {
                let refreshed = session.refresh(&kv).await;
                HAS_SESSION.set(if refreshed.is_some() { 1.0 } else { 0.0 });
                tokio::time::sleep(period).await;
            }
        })
    }

    /// Publishes this node's descriptor on the renew cadence, re-sampling
    /// resources each round (SPEC_FULL.md §2, "Node Reporter"). Skips a round
    /// if no session is currently held; the next renewal picks it back up.
    fn spawn_node_report_loop(&self, sampler: Arc<dyn ResourceSampler>) -> JoinHandle<()> {
        let kv = self.kv.clone();
        let session = self.session.clone();
        let host_name = self.config.host_name.clone();
        let appmesh_proxy_url = self.config.appmesh_url.clone();
        let label = self.config.label.clone();
        let period = std::time::Duration::from_secs(self.config.renew_period_secs().max(1));
        tokio::spawn(async move {
            loop {
                if let Some(session_id) = session.current() {
                    let node = Node {
                        host_name: host_name.clone(),
                        label: label.clone(),
                        appmesh_proxy_url: appmesh_proxy_url.clone(),
                        resource: sampler.sample(),
                    };
                    node::report_node(&kv, &session_id, &node).await;
                }
                tokio::time::sleep(period).await;
            }
        })
    }

    fn spawn_security_watch(&self, sink: Arc<dyn SecuritySink>) -> JoinHandle<()> {
        let kv = self.kv.clone();
        let gate = self.security_gate.clone();
        tokio::spawn(async move {
            run_watch(&kv, "/v1/kv/appmesh/security", false, &gate, || {
                let kv = kv.clone();
                let sink = sink.clone();
                async move {
                    crate::security::sync(&kv, sink.as_ref()).await;
                }
            })
            .await;
        })
    }

    fn spawn_topology_watch(&self, registry: Arc<dyn LocalRegistry>) -> JoinHandle<()> {
        let kv = self.kv.clone();
        let gate = self.topology_gate.clone();
        let host_name = self.config.host_name.clone();
        let proxy_url = self.config.appmesh_url.clone();
        tokio::spawn(async move {
            let path = format!("/v1/kv/appmesh/topology/{}", host_name);
            run_watch(&kv, &path, false, &gate, || {
                let kv = kv.clone();
                let registry = registry.clone();
                let host_name = host_name.clone();
                let proxy_url = proxy_url.clone();
                async move {
                    let tasks = task::retrieve_tasks(&kv).await;
                    crate::convergence::converge(&kv, &host_name, &proxy_url, &tasks, registry.as_ref()).await;
                }
            })
            .await;
        })
    }

    fn spawn_schedule_watch(&self) -> JoinHandle<()> {
        let kv = self.kv.clone();
        let gate = self.schedule_gate.clone();
        let session = self.session.clone();
        let host_name = self.config.host_name.clone();
        let is_leader = self.is_leader.clone();
        let schedule_mutex = self.schedule_mutex.clone();
        tokio::spawn(async move {
            run_watch(&kv, "/v1/kv/appmesh/cluster", true, &gate, || {
                let kv = kv.clone();
                let session = session.clone();
                let host_name = host_name.clone();
                let is_leader = is_leader.clone();
                let schedule_mutex = schedule_mutex.clone();
                async move {
                    do_schedule(&kv, &session, &host_name, &is_leader, &schedule_mutex).await;
                }
            })
            .await;
        })
    }

    /// Runs the offline sequence and releases the session; call before exit.
    pub async fn shutdown(&self, registry: &dyn LocalRegistry) {
        self.security_gate.set(false);
        self.topology_gate.set(false);
        self.schedule_gate.set(false);
        if self.config.is_node {
            crate::convergence::go_offline(&self.kv, &self.config.host_name, registry).await;
        }
        if let Some(id) = self.session.current() {
            self.session.release(&self.kv, &id).await;
        }
        info!(host = %self.config.host_name, "agent shutdown complete");
    }
}

/// One scheduling round: attempt leader election, then (if won) snapshot
/// tasks/nodes/previous-topology, schedule, and write the diff.
async fn do_schedule(
    kv: &KvClient,
    session: &SessionManager,
    host_name: &str,
    is_leader: &AtomicBool,
    schedule_mutex: &AsyncMutex<()>,
) {
    let Some(session_id) = session.current() else {
        is_leader.store(false, Ordering::SeqCst);
        IS_LEADER.set(0.0);
        return;
    };

    let won = election::try_acquire(kv, &session_id, host_name, now_millis()).await;
    is_leader.store(won, Ordering::SeqCst);
    IS_LEADER.set(if won { 1.0 } else { 0.0 });
    KV_CALLS_TOTAL
        .with_label_values(&["election", if won { "acquired" } else { "not_acquired" }])
        .inc();
    if !won {
        return;
    }

    let _guard = schedule_mutex.lock().await;
    let tasks = task::retrieve_tasks(kv).await;
    let nodes = node::retrieve_nodes(kv).await;
    let prev = topology::retrieve_all(kv).await;

    let new_topology = scheduler::schedule(&tasks, &nodes, &prev);
    topology_writer::write_diff(kv, &prev, &new_topology, now_millis()).await;
    SCHEDULING_ROUNDS_TOTAL.inc();

    if new_topology.len() < nodes.len() {
        warn!(
            scheduled_hosts = new_topology.len(),
            total_hosts = nodes.len(),
            "some hosts received no scheduled apps this round"
        );
    }
}
