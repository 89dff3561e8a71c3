//! Request analysis node.
//!
//! Asks the planning LLM which discovered services, if any, should be called
//! for this request. The model answers a strict JSON contract; anything
//! unparseable degrades to "no tool calls", which sends the run down the SQL
//! path (or straight to the response when databases are disabled).

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::engine::AgentDeps;
use crate::protocol::PlannedToolCall;
use crate::settings::LlmRole;
use crate::state::AgentState;

/// The JSON contract the planning LLM must answer with.
#[derive(Debug, Default, Deserialize)]
pub struct AnalysisPlan {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub is_final_answer: bool,
    #[serde(default)]
    pub has_sufficient_info: bool,
    #[serde(default)]
    pub confidence_level: f64,
    #[serde(default)]
    pub tool_calls: Vec<PlannedToolCall>,
}

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?[ \t]*\n(.*?)```").unwrap();
    static ref BARE_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

/// Parse the analyzer's reply, tolerating fenced blocks and prose around
/// the object.
pub fn parse_analysis_reply(reply: &str) -> Option<AnalysisPlan> {
    if let Ok(plan) = serde_json::from_str::<AnalysisPlan>(reply.trim()) {
        return Some(plan);
    }
    if let Some(caps) = FENCED_JSON.captures(reply) {
        if let Ok(plan) = serde_json::from_str::<AnalysisPlan>(caps[1].trim()) {
            return Some(plan);
        }
    }
    if let Some(m) = BARE_OBJECT.find(reply) {
        if let Ok(plan) = serde_json::from_str::<AnalysisPlan>(m.as_str()) {
            return Some(plan);
        }
    }
    None
}

fn build_analysis_prompt(state: &AgentState) -> String {
    let mut services_block = String::new();
    for service in &state.discovered_services {
        services_block.push_str(&format!(
            "- id: {} (type: {})\n",
            service.id, service.service_type
        ));
        for capability in &service.metadata.capabilities {
            services_block.push_str(&format!(
                "    action: {} - {}\n",
                capability.name, capability.description
            ));
        }
    }
    if services_block.is_empty() {
        services_block.push_str("(no services available)\n");
    }

    format!(
        "You are the planner of a data-access agent. Decide which of the \
         available services should be called to answer the user's request.\n\
         \nUser request: {}\n\
         \nAvailable services:\n{}\
         \nAnswer with a single JSON object of this exact shape and nothing else:\n\
         {{\"response\": \"<short reasoning>\", \"is_final_answer\": false, \
         \"has_sufficient_info\": false, \"confidence_level\": 0.0, \
         \"tool_calls\": [{{\"service_id\": \"<id>\", \"method\": \"<action>\", \
         \"params\": {{}}}}]}}\n\
         Plan no tool calls (an empty list) when none of the services helps.",
        state.user_request, services_block
    )
}

/// Analyze the request and plan MCP tool calls.
pub async fn analyze_request_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    if state.discovered_services.is_empty() {
        println!("[Analyze] No services discovered; planning no tool calls");
        state.mcp_tool_calls.clear();
        state.use_mcp_results = false;
        return Ok(state);
    }

    let prompt = build_analysis_prompt(&state);
    match deps.complete(LlmRole::Mcp, &prompt).await {
        Ok(reply) => match parse_analysis_reply(&reply) {
            Some(plan) => {
                println!(
                    "[Analyze] Planner proposed {} tool call(s), confidence {:.2}",
                    plan.tool_calls.len(),
                    plan.confidence_level
                );
                state.use_mcp_results = !plan.tool_calls.is_empty();
                state.mcp_tool_calls = plan.tool_calls;
            }
            None => {
                println!("[Analyze] Planner reply was not valid JSON; planning no tool calls");
                state.mcp_tool_calls.clear();
                state.use_mcp_results = false;
            }
        },
        Err(e) => {
            println!("[Analyze] Planner failed ({}); planning no tool calls", e);
            state.mcp_tool_calls.clear();
            state.use_mcp_results = false;
        }
    }
    Ok(state)
}
