//! Conditional-edge routers.
//!
//! Pure functions on the state, returning edge labels. The label-to-node
//! mapping lives with the graph wiring in `engine`. Routers never mutate
//! state; the node an error is handed to consumes it.

use crate::protocol::CallStatus;
use crate::state::{AgentState, QueryType};

use super::rag::rag_was_planned;
use super::search::is_search_result;

/// Cap on refinement retries.
pub const MAX_SQL_RETRIES: u32 = 5;
/// Cap on widening attempts.
pub const MAX_WIDER_ATTEMPTS: u32 = 5;

/// After `analyze_request`: run planned tool calls, else enter the SQL path,
/// else go straight to the response.
pub fn route_after_analysis(state: &AgentState) -> &'static str {
    if state.use_mcp_results && !state.mcp_tool_calls.is_empty() {
        "mcp"
    } else if !state.disable_databases {
        "sql"
    } else {
        "respond"
    }
}

/// After `execute_mcp_queries`: enrich search results first, then RAG, then
/// the evidence context.
pub fn route_after_mcp(state: &AgentState) -> &'static str {
    let has_search_hits = state.mcp_service_results.iter().any(|r| {
        r.status == CallStatus::Success && is_search_result(state, &r.service_id, &r.action)
    });
    if has_search_hits {
        "search"
    } else if rag_was_planned(state) {
        "documents"
    } else {
        "augment"
    }
}

/// After `augment_context`: with databases enabled the SQL path still runs;
/// otherwise the MCP evidence is all there will be.
pub fn route_after_augment(state: &AgentState) -> &'static str {
    if state.disable_databases {
        "respond"
    } else {
        "sql"
    }
}

/// After `validate_sql`: an error goes to refinement, a widened candidate
/// to the wider executor, everything else to execution.
pub fn route_after_validation(state: &AgentState) -> &'static str {
    if state.validation_error.is_some() || state.sql_generation_error.is_some() {
        "refine"
    } else if state.query_type == QueryType::WiderSearch {
        "wider"
    } else {
        "execute"
    }
}

/// After `execute_sql`: errors retry through refinement while budget
/// remains; zero rows on the initial query trigger widening; otherwise the
/// run moves to the response.
pub fn route_after_execution(state: &AgentState) -> &'static str {
    if state.has_error() {
        if state.retry_count < MAX_SQL_RETRIES {
            return "refine";
        }
        return "respond";
    }
    if state.db_results.is_empty()
        && state.query_type == QueryType::Initial
        && state.retry_count < MAX_WIDER_ATTEMPTS
        && !state.disable_databases
    {
        return "widen";
    }
    "respond"
}

/// After `generate_wider_search_query`: a dead-end wrote the final response
/// already; otherwise the widened candidate goes through validation.
pub fn route_after_wider_generation(state: &AgentState) -> &'static str {
    if !state.final_response.is_empty() {
        "respond"
    } else {
        "validate"
    }
}

/// After `execute_wider_search`: an execution error refines, an empty result
/// widens again, anything else answers.
pub fn route_after_wider_execution(state: &AgentState) -> &'static str {
    if state.has_error() {
        if state.retry_count < MAX_SQL_RETRIES {
            return "refine";
        }
        return "respond";
    }
    if state.db_results.is_empty() && state.retry_count < MAX_WIDER_ATTEMPTS {
        return "widen";
    }
    "respond"
}

/// After `refine_sql`: exhausted retries answer apologetically; otherwise
/// the refined candidate goes back through validation.
pub fn route_after_refinement(state: &AgentState) -> &'static str {
    if state.retry_count >= MAX_SQL_RETRIES {
        "respond"
    } else {
        "validate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{McpServiceResult, PlannedToolCall, ServiceInfo, ServiceMetadata};
    use serde_json::json;

    fn search_service(id: &str) -> ServiceInfo {
        ServiceInfo {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8090,
            service_type: "search".to_string(),
            metadata: ServiceMetadata::default(),
            ttl_seconds: 45,
            last_heartbeat: String::new(),
        }
    }

    #[test]
    fn test_route_after_analysis() {
        let mut state = AgentState::new("q");
        assert_eq!(route_after_analysis(&state), "sql");

        state.disable_databases = true;
        assert_eq!(route_after_analysis(&state), "respond");

        state.mcp_tool_calls.push(PlannedToolCall {
            service_id: "dns-1".to_string(),
            action: "resolve_domain".to_string(),
            parameters: json!({}),
        });
        state.use_mcp_results = true;
        assert_eq!(route_after_analysis(&state), "mcp");
    }

    #[test]
    fn test_route_after_mcp_prefers_search() {
        let mut state = AgentState::new("q");
        state.discovered_services.push(search_service("search-1"));
        state.mcp_service_results.push(McpServiceResult {
            service_id: "search-1".to_string(),
            action: "brave_search".to_string(),
            parameters: json!({}),
            status: CallStatus::Success,
            result: json!({ "results": [] }),
            error: None,
            timestamp: String::new(),
        });
        assert_eq!(route_after_mcp(&state), "search");

        // A failed search call does not trigger enrichment.
        state.mcp_service_results[0].status = CallStatus::Error;
        assert_eq!(route_after_mcp(&state), "augment");
    }

    #[test]
    fn test_route_after_validation() {
        let mut state = AgentState::new("q");
        state.sql_query = "SELECT 1".to_string();
        assert_eq!(route_after_validation(&state), "execute");

        state.query_type = QueryType::WiderSearch;
        assert_eq!(route_after_validation(&state), "wider");

        state.validation_error = Some("bad".to_string());
        assert_eq!(route_after_validation(&state), "refine");
    }

    #[test]
    fn test_route_after_execution_widens_on_empty_initial() {
        let mut state = AgentState::new("q");
        assert_eq!(route_after_execution(&state), "widen");

        state.query_type = QueryType::WiderSearch;
        assert_eq!(route_after_execution(&state), "respond");
    }

    #[test]
    fn test_route_after_execution_refines_until_budget() {
        let mut state = AgentState::new("q");
        state.validation_error = Some("missing column".to_string());
        state.retry_count = 1;
        assert_eq!(route_after_execution(&state), "refine");

        state.retry_count = MAX_SQL_RETRIES;
        assert_eq!(route_after_execution(&state), "respond");
    }

    #[test]
    fn test_route_after_wider_execution() {
        let mut state = AgentState::new("q");
        state.query_type = QueryType::WiderSearch;
        state.retry_count = 1;
        assert_eq!(route_after_wider_execution(&state), "widen");

        state.retry_count = MAX_WIDER_ATTEMPTS;
        assert_eq!(route_after_wider_execution(&state), "respond");

        state.retry_count = 1;
        let mut row = serde_json::Map::new();
        row.insert("a".to_string(), json!(1));
        state.db_results.push(row);
        assert_eq!(route_after_wider_execution(&state), "respond");
    }

    #[test]
    fn test_route_after_refinement() {
        let mut state = AgentState::new("q");
        state.retry_count = 2;
        assert_eq!(route_after_refinement(&state), "validate");
        state.retry_count = MAX_SQL_RETRIES;
        assert_eq!(route_after_refinement(&state), "respond");
    }

    #[test]
    fn test_route_after_augment() {
        let mut state = AgentState::new("q");
        assert_eq!(route_after_augment(&state), "sql");
        state.disable_databases = true;
        assert_eq!(route_after_augment(&state), "respond");
    }
}
