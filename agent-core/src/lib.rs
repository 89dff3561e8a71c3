//! Agentic query orchestrator.
//!
//! Given a natural-language request, the engine coordinates LLMs, SQL
//! databases, document retrieval, web search and other MCP workers to
//! produce one grounded answer. The value is the stateful graph deciding
//! what to do next: routing a request down the SQL or MCP path, retrying
//! failed candidates, widening empty searches, and merging heterogeneous
//! evidence.
//!
//! ## Crate layout
//! - `graph`: the generic graph runtime (nodes, edges, routers, recursion cap)
//! - `nodes`: the concrete orchestration nodes and routers
//! - `sql`: extraction, sanitization, the safety screen and schema validation
//! - `llm`: per-role completion backends
//! - `database`: the driver seam and the multi-database manager
//! - `registry` / `services`: service discovery and the uniform call surface
//! - `engine`: dependency container, graph wiring, request entrypoint
//! - `settings`: env-sourced configuration
//! - `protocol` / `state` / `error`: shared types

pub mod cli;
pub mod database;
pub mod engine;
pub mod error;
pub mod graph;
pub mod llm;
pub mod nodes;
pub mod protocol;
pub mod registry;
pub mod services;
pub mod settings;
pub mod sql;
pub mod state;

#[cfg(test)]
mod tests;

pub use engine::{
    build_agent_graph, run_agent_request, run_agent_request_on, AgentDeps, RunOutcome,
};
pub use protocol::RequestEnvelope;
pub use settings::Settings;
pub use state::AgentState;
