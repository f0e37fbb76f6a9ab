//! Prometheus metrics and the `/metrics` + `/health` HTTP endpoints
//! (SPEC_FULL.md §10.4).

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "clustermesh".to_string());

    pub static ref KV_CALLS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("kv_calls_total", "Coordination store KV calls by method and outcome")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["method", "outcome"]
        ).unwrap();

    pub static ref WATCH_ITERATIONS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("watch_iterations_total", "Watch loop iterations by path and whether they observed a change")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["watch_path", "changed"]
        ).unwrap();

    pub static ref SCHEDULING_ROUNDS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("scheduling_rounds_total", "Total number of scheduling rounds run")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TOPOLOGY_WRITES_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("topology_writes_total", "Topology KV writes by kind")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["kind"] // changed, removed
        ).unwrap();

    pub static ref CONVERGENCE_ACTIONS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("convergence_actions_total", "Local app reconciliation actions by kind")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["kind"] // add, update, remove
        ).unwrap();

    pub static ref IS_LEADER: Gauge =
        Gauge::with_opts(
            Opts::new("is_leader", "1 if this agent currently holds the leader lock")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref HAS_SESSION: Gauge =
        Gauge::with_opts(
            Opts::new("has_session", "1 if this agent currently holds a live coordination-store session")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = prometheus::default_registry();
    registry.register(Box::new(KV_CALLS_TOTAL.clone()))?;
    registry.register(Box::new(WATCH_ITERATIONS_TOTAL.clone()))?;
    registry.register(Box::new(SCHEDULING_ROUNDS_TOTAL.clone()))?;
    registry.register(Box::new(TOPOLOGY_WRITES_TOTAL.clone()))?;
    registry.register(Box::new(CONVERGENCE_ACTIONS_TOTAL.clone()))?;
    registry.register(Box::new(IS_LEADER.clone()))?;
    registry.register(Box::new(HAS_SESSION.clone()))?;
    Ok(())
}

fn gather_metrics_body() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::default_registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    buffer
}

async fn handle(req: Request<Body>, healthy: Arc<AtomicBool>) -> Result<Response<Body>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let encoder = TextEncoder::new();
            Response::builder()
                .status(200)
                .header("Content-Type", encoder.format_type())
                .body(Body::from(gather_metrics_body()))
                .unwrap()
        }
        (&Method::GET, "/health") => {
            let status = if healthy.load(Ordering::SeqCst) { 200 } else { 503 };
            Response::builder()
                .status(status)
                .body(Body::from(if status == 200 { "ok" } else { "unhealthy" }))
                .unwrap()
        }
        _ => Response::builder().status(404).body(Body::empty()).unwrap(),
    };
    Ok(response)
}

/// Starts the `/metrics` + `/health` HTTP server, bound to `addr`.
///
/// `healthy` is a shared flag the agent's main loop flips; this server only
/// reports it, it never computes health itself.
pub async fn start_metrics_server(addr: std::net::SocketAddr, healthy: Arc<AtomicBool>) {
    let make_svc = make_service_fn(move |_conn| {
        let healthy = healthy.clone();
        async move { Ok::<_, hyper::Error>(service_fn(move |req| handle(req, healthy.clone()))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(addr = %addr, "metrics/health server listening");

    if let Err(e) = server.await {
        error!(error = %e, "metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_metrics_body_is_valid_utf8() {
        let _ = register_metrics(); // may already be registered by another test; ignore errors
        let body = gather_metrics_body();
        assert!(String::from_utf8(body).is_ok());
    }
}
