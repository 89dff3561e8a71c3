//! Service adapter.
//!
//! The one call surface every off-process MCP worker is reached through:
//! `call(service, action, parameters)` posts the action envelope to the
//! worker's endpoint and normalizes whatever shape comes back into a
//! `ServiceEnvelope`. Timeouts and transport failures surface as
//! `status=error` envelopes with an error-kind tag; they never escape as
//! exceptions. UTF-8 payloads round-trip untouched.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::error::ErrorKind;
use crate::protocol::{ServiceEnvelope, ServiceInfo};
use crate::settings::Settings;

/// Uniform HTTP caller for MCP workers.
#[derive(Clone)]
pub struct ServiceAdapter {
    client: reqwest::Client,
    timeout: Duration,
}

impl ServiceAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(Duration::from_secs(settings.service_timeout_secs))
    }

    /// Resolve a planned call's `service_id` against the discovered list:
    /// exact id first, then service type as a fallback.
    pub fn resolve<'a>(
        services: &'a [ServiceInfo],
        id_or_type: &str,
    ) -> Option<&'a ServiceInfo> {
        services
            .iter()
            .find(|s| s.id == id_or_type)
            .or_else(|| services.iter().find(|s| s.service_type == id_or_type))
    }

    /// Call one worker action and normalize the reply.
    pub async fn call(
        &self,
        service: &ServiceInfo,
        action: &str,
        parameters: Value,
    ) -> ServiceEnvelope {
        let url = service.endpoint();
        let body = json!({ "action": action, "parameters": parameters });

        let send = self.client.post(&url).json(&body).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Execution
                };
                return ServiceEnvelope::failure(
                    kind,
                    format!("Call to {} '{}' failed: {}", service.id, action, e),
                );
            }
            Err(_) => {
                return ServiceEnvelope::failure(
                    ErrorKind::Timeout,
                    format!(
                        "Call to {} '{}' timed out after {:?}",
                        service.id, action, self.timeout
                    ),
                );
            }
        };

        let status = response.status();
        let reply: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ServiceEnvelope::failure(
                    ErrorKind::Execution,
                    format!("Reply from {} '{}' is not JSON: {}", service.id, action, e),
                );
            }
        };

        if !status.is_success() {
            return ServiceEnvelope::failure(
                ErrorKind::Execution,
                format!("{} '{}' returned HTTP {}: {}", service.id, action, status, reply),
            );
        }

        normalize_reply(reply)
    }
}

/// Collapse the reply shapes workers actually produce into one envelope.
///
/// Accepted shapes: an explicit `{status, result|error}` envelope, or a
/// flat object carrying its payload fields next to a `status` key.
fn normalize_reply(reply: Value) -> ServiceEnvelope {
    match &reply {
        Value::Object(object) => {
            let status = object.get("status").and_then(Value::as_str);
            if status == Some("error") || object.get("error").map_or(false, |e| !e.is_null()) {
                let message = object
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown service error")
                    .to_string();
                return ServiceEnvelope::failure(ErrorKind::Execution, message);
            }

            if let Some(result) = object.get("result") {
                return ServiceEnvelope::success(result.clone());
            }

            // Flat reply: keep every payload field, drop the status marker.
            let mut payload = Map::new();
            for (key, value) in object {
                if key != "status" {
                    payload.insert(key.clone(), value.clone());
                }
            }
            ServiceEnvelope::success(Value::Object(payload))
        }
        _ => ServiceEnvelope::success(reply),
    }
}

/// Flatten the search-reply nesting variants into one list view:
/// `{result:{result:{results:[…]}}}`, `{result:{results:[…]}}`,
/// `{results:[…]}` and `{data:[…]}` all collapse to the same `Vec`.
pub fn flatten_search_results(value: &Value) -> Vec<Value> {
    if let Some(results) = value.get("results").and_then(Value::as_array) {
        return results.clone();
    }
    if let Some(data) = value.get("data").and_then(Value::as_array) {
        return data.clone();
    }
    if let Some(inner) = value.get("result") {
        return flatten_search_results(inner);
    }
    if let Some(array) = value.as_array() {
        return array.clone();
    }
    Vec::new()
}
