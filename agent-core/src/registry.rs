//! Registry client.
//!
//! Talks to the MCP service registry over its `{action, parameters}` action
//! endpoint: register, heartbeat, discover, deregister. Hosted services run
//! their heartbeat in a background task owned by `HeartbeatTask`; dropping
//! or stopping the task cancels the loop cleanly via a watch channel, and
//! heartbeat failures back off exponentially (1, 2, 4, 8 s, capped) without
//! ever terminating the hosting service.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;

use crate::protocol::ServiceInfo;

/// Default seconds between heartbeats.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 20;
/// Default registration TTL; must exceed the heartbeat interval.
pub const DEFAULT_TTL_SECS: u64 = 45;
/// Cap for the failure backoff, seconds.
const BACKOFF_CAP_SECS: u64 = 8;

/// HTTP client for one registry endpoint.
#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(&self, action: &str, parameters: Value) -> Result<Value, String> {
        let reply: Value = self
            .client
            .post(&self.base_url)
            .json(&json!({ "action": action, "parameters": parameters }))
            .send()
            .await
            .map_err(|e| format!("Registry '{}' call failed: {}", action, e))?
            .json()
            .await
            .map_err(|e| format!("Registry '{}' reply is not JSON: {}", action, e))?;

        if reply.get("status").and_then(Value::as_str) == Some("success") {
            Ok(reply.get("result").cloned().unwrap_or(Value::Null))
        } else {
            Err(reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown registry error")
                .to_string())
        }
    }

    /// Register a service with the given TTL.
    pub async fn register(&self, service: &ServiceInfo, ttl_seconds: u64) -> Result<(), String> {
        self.call(
            "register",
            json!({ "service_info": service, "ttl_seconds": ttl_seconds }),
        )
        .await?;
        println!(
            "[RegistryClient] Registered '{}' with ttl={}s",
            service.id, ttl_seconds
        );
        Ok(())
    }

    /// Refresh one service's TTL.
    pub async fn heartbeat(&self, service_id: &str) -> Result<(), String> {
        self.call("heartbeat", json!({ "service_id": service_id }))
            .await
            .map(|_| ())
    }

    /// List live services, optionally filtered by type.
    pub async fn discover(&self, type_filter: Option<&str>) -> Result<Vec<ServiceInfo>, String> {
        let parameters = match type_filter {
            Some(t) => json!({ "type": t }),
            None => json!({}),
        };
        let result = self.call("discover", parameters).await?;
        let services = result.get("services").cloned().unwrap_or(json!([]));
        serde_json::from_value(services)
            .map_err(|e| format!("Registry discover reply is malformed: {}", e))
    }

    /// Remove a service on orderly shutdown.
    pub async fn deregister(&self, service_id: &str) -> Result<(), String> {
        self.call("deregister", json!({ "service_id": service_id }))
            .await
            .map(|_| ())
    }
}

/// A running heartbeat loop for one hosted service.
///
/// Owned by the service lifecycle: `stop()` (or dropping after `stop`)
/// cancels the loop and deregisters the service.
pub struct HeartbeatTask {
    service_id: String,
    registry: RegistryClient,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl HeartbeatTask {
    /// Register `service` and start heartbeating it every
    /// `interval` (clamped to at least one second).
    pub async fn start(
        registry: RegistryClient,
        service: ServiceInfo,
        ttl_seconds: u64,
        interval: Duration,
    ) -> Result<Self, String> {
        registry.register(&service, ttl_seconds).await?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let service_id = service.id.clone();
        let loop_registry = registry.clone();
        let loop_id = service_id.clone();
        let interval = interval.max(Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            let mut failure_streak: u32 = 0;
            loop {
                // Healthy: wait the full interval. After a failure: retry on
                // the 1, 2, 4, 8 second ladder, capped.
                let sleep_for = if failure_streak > 0 {
                    Duration::from_secs(
                        (1u64 << (failure_streak - 1).min(3)).min(BACKOFF_CAP_SECS),
                    )
                } else {
                    interval
                };
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            println!("[Heartbeat] '{}' loop stopping", loop_id);
                            return;
                        }
                        continue;
                    }
                }

                match loop_registry.heartbeat(&loop_id).await {
                    Ok(()) => {
                        failure_streak = 0;
                    }
                    Err(e) => {
                        // Failures never terminate the hosting service; they
                        // just push the next attempt out.
                        failure_streak += 1;
                        println!(
                            "[Heartbeat] '{}' failed ({}); attempt {} backed off",
                            loop_id, e, failure_streak
                        );
                    }
                }
            }
        });

        Ok(Self {
            service_id,
            registry,
            shutdown_tx,
            handle,
        })
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Cancel the loop and deregister the service.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        if let Err(e) = self.registry.deregister(&self.service_id).await {
            println!(
                "[Heartbeat] Deregistration of '{}' failed: {}",
                self.service_id, e
            );
        }
    }
}
