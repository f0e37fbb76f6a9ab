use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use clustermesh_core::agent::Agent;
use clustermesh_core::config::AgentConfig;
use clustermesh_core::convergence::LocalRegistry;
use clustermesh_core::metrics::{register_metrics, start_metrics_server};
use clustermesh_core::node::{Resource, ResourceSampler};
use clustermesh_core::security::SecuritySink;

/// Placeholder local-application registry.
///
/// The real application engine (process/container supervision) is an
/// external collaborator this core never implements directly (SPEC_FULL.md
/// §1 Non-goals); this in-memory stand-in lets the agent run standalone
/// until it is wired to that engine.
struct InMemoryRegistry {
    apps: Mutex<HashMap<String, Value>>,
}

impl InMemoryRegistry {
    fn new() -> Self {
        Self {
            apps: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LocalRegistry for InMemoryRegistry {
    async fn cloud_app_names(&self) -> Vec<String> {
        self.apps.lock().await.keys().cloned().collect()
    }

    async fn get(&self, name: &str) -> Option<Value> {
        self.apps.lock().await.get(name).cloned()
    }

    async fn add(&self, name: &str, descriptor: Value) {
        self.apps.lock().await.insert(name.to_string(), descriptor);
    }

    async fn remove(&self, name: &str) {
        self.apps.lock().await.remove(name);
    }
}

struct LoggingSecuritySink;

impl SecuritySink for LoggingSecuritySink {
    fn update(&self, document: Value) {
        let user_count = document
            .get("jwtUsers")
            .and_then(Value::as_object)
            .map(|m| m.len())
            .unwrap_or(0);
        info!(user_count, "applied security document");
    }
}

/// Placeholder CPU/memory probe.
///
/// Sampling host resources is an external concern this core never implements
/// directly (SPEC_FULL.md §1 Non-goals); a real deployment would supply a
/// sampler backed by `/proc` or a crate like `sysinfo`.
struct ZeroResourceSampler;

impl ResourceSampler for ZeroResourceSampler {
    fn sample(&self) -> Resource {
        Resource::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AgentConfig::from_env()?;
    info!(host = %config.host_name, is_master = config.is_master, is_node = config.is_node, "starting agent");

    if !config.consul_enabled {
        info!("CONSUL_ENABLED is false, coordination core is disabled; idling");
        return Ok(());
    }

    register_metrics()?;

    let agent = Agent::new(config.clone());
    let healthy = agent.healthy_flag();

    let metrics_addr: std::net::SocketAddr = config.metrics_addr.parse()?;
    tokio::spawn(start_metrics_server(metrics_addr, healthy));

    let registry: Arc<dyn LocalRegistry> = Arc::new(InMemoryRegistry::new());
    let security_sink: Arc<dyn SecuritySink> = Arc::new(LoggingSecuritySink);
    let resource_sampler: Arc<dyn ResourceSampler> = Arc::new(ZeroResourceSampler);

    let handles = agent.spawn(registry.clone(), security_sink, resource_sampler);

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    agent.shutdown(registry.as_ref()).await;

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
