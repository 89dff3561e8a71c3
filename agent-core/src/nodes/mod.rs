//! Orchestration nodes.
//!
//! Each node is an async function `(AgentState, Arc<AgentDeps>) ->
//! Result<AgentState, String>`; the graph wiring in `engine` composes them.
//! Routers (the bodies of the conditional edges) are pure functions over the
//! state and live in `routers`.
//!
//! ## Module structure
//! - `schema`: schema fetch across databases
//! - `discover`: registry discovery
//! - `analyze`: request analysis / tool-call planning
//! - `mcp`: planned tool-call execution
//! - `search`: search-result enrichment (download, summarize, rerank)
//! - `rag`: document retrieval
//! - `augment`: evidence-context construction and source resolution
//! - `sql_generate`: SQL generation, refinement and widening
//! - `sql_validate`: the safety gate
//! - `sql_execute`: multi-database execution
//! - `respond`: prompt build and final response
//! - `routers`: conditional-edge functions

pub mod analyze;
pub mod augment;
pub mod discover;
pub mod mcp;
pub mod rag;
pub mod respond;
pub mod routers;
pub mod schema;
pub mod search;
pub mod sql_execute;
pub mod sql_generate;
pub mod sql_validate;

use crate::state::AgentState;

/// Type of the service a result came from, looked up in the discovered list.
pub fn service_type_of<'a>(state: &'a AgentState, service_id: &str) -> Option<&'a str> {
    state
        .discovered_services
        .iter()
        .find(|s| s.id == service_id || s.service_type == service_id)
        .map(|s| s.service_type.as_str())
}
