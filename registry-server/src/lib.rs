//! MCP Service Registry
//!
//! A small HTTP directory of live MCP workers. Services register themselves
//! with a TTL, refresh it with periodic heartbeats, and are listed back to
//! clients via discovery. Entries whose TTL lapses without a heartbeat are
//! expired, so discovery only ever returns services believed to be alive.
//!
//! The wire surface is a single `POST /` endpoint taking `{action, parameters}`
//! and replying `{status, result|error}`, matching the action envelope every
//! MCP worker in the system speaks:
//! - `register`: `{service_info, ttl_seconds?}`
//! - `heartbeat`: `{service_id}`
//! - `discover`: `{type?}`
//! - `deregister`: `{service_id}`

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

/// Default host the registry binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default port the registry listens on.
pub const DEFAULT_PORT: u16 = 8080;
/// TTL applied when a registration does not name one.
pub const DEFAULT_TTL_SECONDS: u64 = 45;
/// How often the background sweep evicts expired services.
const SWEEP_INTERVAL_SECONDS: u64 = 5;

/// Public description of a registered service, as stored and as returned
/// from discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// RFC 3339 timestamp of the last registration or heartbeat.
    #[serde(default)]
    pub last_heartbeat: String,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

/// A registered service plus the monotonic deadline used for expiry checks.
struct LiveService {
    record: ServiceRecord,
    expires_at: Instant,
}

/// Shared registry state.
#[derive(Clone, Default)]
pub struct RegistryState {
    services: Arc<RwLock<HashMap<String, LiveService>>>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a service and arm its TTL.
    pub async fn register(&self, mut record: ServiceRecord) -> ServiceRecord {
        if record.ttl_seconds == 0 {
            record.ttl_seconds = DEFAULT_TTL_SECONDS;
        }
        record.last_heartbeat = chrono::Utc::now().to_rfc3339();
        let expires_at = Instant::now() + Duration::from_secs(record.ttl_seconds);
        let mut services = self.services.write().await;
        println!(
            "[Registry] Registered '{}' ({}) at {}:{} ttl={}s",
            record.id, record.service_type, record.host, record.port, record.ttl_seconds
        );
        services.insert(
            record.id.clone(),
            LiveService {
                record: record.clone(),
                expires_at,
            },
        );
        record
    }

    /// Refresh a service's TTL. Returns false for unknown or expired ids.
    pub async fn heartbeat(&self, service_id: &str) -> bool {
        let mut services = self.services.write().await;
        match services.get_mut(service_id) {
            Some(live) if live.expires_at > Instant::now() => {
                live.record.last_heartbeat = chrono::Utc::now().to_rfc3339();
                live.expires_at = Instant::now() + Duration::from_secs(live.record.ttl_seconds);
                true
            }
            Some(_) => {
                // TTL already lapsed; the entry is stale and must re-register.
                services.remove(service_id);
                println!("[Registry] Heartbeat for expired service '{}'", service_id);
                false
            }
            None => false,
        }
    }

    /// List live services, optionally filtered by type. Expired entries are
    /// evicted on the way out.
    pub async fn discover(&self, type_filter: Option<&str>) -> Vec<ServiceRecord> {
        let now = Instant::now();
        let mut services = self.services.write().await;
        services.retain(|_, live| live.expires_at > now);
        services
            .values()
            .filter(|live| match type_filter {
                Some(t) => live.record.service_type == t,
                None => true,
            })
            .map(|live| live.record.clone())
            .collect()
    }

    /// Remove a service. Returns true if it was present.
    pub async fn deregister(&self, service_id: &str) -> bool {
        let removed = self.services.write().await.remove(service_id).is_some();
        if removed {
            println!("[Registry] Deregistered '{}'", service_id);
        }
        removed
    }

    /// Evict every service whose TTL has lapsed. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut services = self.services.write().await;
        let before = services.len();
        services.retain(|_, live| live.expires_at > now);
        before - services.len()
    }
}

/// Action envelope accepted on `POST /`.
#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: String,
    #[serde(default)]
    parameters: Value,
}

async fn handle_action(
    State(state): State<RegistryState>,
    Json(request): Json<ActionRequest>,
) -> Json<Value> {
    match request.action.as_str() {
        "register" => {
            let info = request
                .parameters
                .get("service_info")
                .cloned()
                .unwrap_or(Value::Null);
            let ttl = request
                .parameters
                .get("ttl_seconds")
                .and_then(|v| v.as_u64());
            match serde_json::from_value::<ServiceRecord>(info) {
                Ok(mut record) => {
                    if let Some(ttl) = ttl {
                        record.ttl_seconds = ttl;
                    }
                    let stored = state.register(record).await;
                    Json(json!({ "status": "success", "result": stored }))
                }
                Err(e) => Json(json!({
                    "status": "error",
                    "error": format!("Invalid service_info: {}", e)
                })),
            }
        }
        "heartbeat" => {
            let service_id = request
                .parameters
                .get("service_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if state.heartbeat(service_id).await {
                Json(json!({ "status": "success", "result": { "service_id": service_id } }))
            } else {
                Json(json!({
                    "status": "error",
                    "error": format!("Unknown or expired service: {}", service_id)
                }))
            }
        }
        "discover" => {
            let type_filter = request
                .parameters
                .get("type")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let services = state.discover(type_filter.as_deref()).await;
            Json(json!({ "status": "success", "result": { "services": services } }))
        }
        "deregister" => {
            let service_id = request
                .parameters
                .get("service_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let removed = state.deregister(service_id).await;
            Json(json!({ "status": "success", "result": { "removed": removed } }))
        }
        other => Json(json!({
            "status": "error",
            "error": format!("Unknown action: {}", other)
        })),
    }
}

/// Build the axum router for the registry.
pub fn build_router(state: RegistryState) -> Router {
    Router::new().route("/", post(handle_action)).with_state(state)
}

/// Bind the registry on `addr` and serve it in a background task.
///
/// Returns the bound address (useful with port 0) and the task handle. The
/// TTL sweep runs alongside the listener and stops when the task is aborted.
pub async fn spawn(addr: SocketAddr) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), String> {
    let state = RegistryState::new();
    let router = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind registry on {}: {}", addr, e))?;
    let bound = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;

    let handle = tokio::spawn(async move {
        let sweep_state = state.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECONDS));
            loop {
                interval.tick().await;
                let evicted = sweep_state.sweep().await;
                if evicted > 0 {
                    println!("[Registry] Swept {} expired service(s)", evicted);
                }
            }
        });
        if let Err(e) = axum::serve(listener, router).await {
            println!("[Registry] Server error: {}", e);
        }
    });

    println!("[Registry] Listening on {}", bound);
    Ok((bound, handle))
}
