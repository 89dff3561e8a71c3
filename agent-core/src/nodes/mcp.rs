//! Planned tool-call execution node.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::engine::AgentDeps;
use crate::protocol::{CallStatus, McpServiceResult, PlannedToolCall, ServiceEnvelope};
use crate::services::ServiceAdapter;
use crate::state::AgentState;

/// Execute every planned tool call through the service adapter.
///
/// Calls are issued concurrently, but `mcp_service_results` comes back in
/// the request order of `mcp_tool_calls`. A single call's failure is
/// recorded as an `error` entry and does not abort its siblings.
pub async fn execute_mcp_queries_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    if state.mcp_tool_calls.is_empty() {
        return Ok(state);
    }

    println!(
        "[ExecuteMcp] Dispatching {} planned call(s)",
        state.mcp_tool_calls.len()
    );

    let calls = state.mcp_tool_calls.clone();
    let futures = calls.iter().map(|call| {
        let deps = deps.clone();
        let services = state.discovered_services.clone();
        let call = call.clone();
        async move {
            match ServiceAdapter::resolve(&services, &call.service_id) {
                Some(service) => {
                    deps.call_service(service, &call.action, call.parameters.clone())
                        .await
                }
                None => ServiceEnvelope::failure(
                    crate::error::ErrorKind::Execution,
                    format!("Service '{}' is not registered", call.service_id),
                ),
            }
        }
    });

    // join_all preserves input order, so results line up with the plan.
    let envelopes = join_all(futures).await;

    state.mcp_service_results = calls
        .iter()
        .zip(envelopes)
        .map(|(call, envelope)| to_service_result(call, envelope))
        .collect();

    let failures = state
        .mcp_service_results
        .iter()
        .filter(|r| r.status == CallStatus::Error)
        .count();
    println!(
        "[ExecuteMcp] {} call(s) completed, {} failed",
        state.mcp_service_results.len(),
        failures
    );
    Ok(state)
}

fn to_service_result(call: &PlannedToolCall, envelope: ServiceEnvelope) -> McpServiceResult {
    McpServiceResult {
        service_id: call.service_id.clone(),
        action: call.action.clone(),
        parameters: call.parameters.clone(),
        status: envelope.status,
        result: if envelope.is_success() {
            envelope.result
        } else {
            Value::Null
        },
        error: envelope.error,
        timestamp: envelope.timestamp,
    }
}
