//! Engine wiring.
//!
//! Owns the dependency container every node receives, the construction of
//! the full agent graph (nodes + edges + routers), and the request
//! entrypoint that validates the envelope, seeds the state and walks the
//! graph.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::database::MultiDatabaseManager;
use crate::graph::{CompiledGraph, GraphBuilder, DEFAULT_RECURSION_LIMIT, END};
use crate::llm::LlmRouter;
use crate::nodes;
use crate::nodes::routers;
use crate::protocol::{
    McpServiceResult, RequestEnvelope, RowObject, ServiceEnvelope, ServiceInfo,
};
use crate::registry::RegistryClient;
use crate::services::ServiceAdapter;
use crate::settings::{LlmRole, Settings};
use crate::state::{AgentState, QueryType};

/// Everything a node may need: configuration, LLM backends, databases, the
/// service adapter and the optional registry. Shared across requests; the
/// per-request deadline is the only per-run field.
pub struct AgentDeps {
    pub settings: Settings,
    pub llm: LlmRouter,
    pub databases: Arc<MultiDatabaseManager>,
    pub adapter: ServiceAdapter,
    pub registry: Option<RegistryClient>,
    pub deadline: Option<tokio::time::Instant>,
}

impl AgentDeps {
    /// Build the production container from settings.
    pub fn from_settings(settings: Settings) -> Result<Self, String> {
        let llm = LlmRouter::from_settings(&settings)?;
        let databases = Arc::new(MultiDatabaseManager::from_settings(&settings));
        let adapter = ServiceAdapter::from_settings(&settings);
        let registry = settings.registry_url.clone().map(RegistryClient::new);
        Ok(Self {
            settings,
            llm,
            databases,
            adapter,
            registry,
            deadline: None,
        })
    }

    pub fn with_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
    }

    /// Deadline-aware LLM completion.
    pub async fn complete(&self, role: LlmRole, prompt: &str) -> Result<String, String> {
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => {
                Err("request deadline exceeded".to_string())
            }
            Some(remaining) => tokio::time::timeout(remaining, self.llm.complete(role, prompt))
                .await
                .map_err(|_| "request deadline exceeded during LLM call".to_string())?,
            None => self.llm.complete(role, prompt).await,
        }
    }

    /// Deadline-aware service call.
    pub async fn call_service(
        &self,
        service: &ServiceInfo,
        action: &str,
        parameters: serde_json::Value,
    ) -> ServiceEnvelope {
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => ServiceEnvelope::failure(
                crate::error::ErrorKind::Timeout,
                "request deadline exceeded",
            ),
            Some(remaining) => {
                match tokio::time::timeout(
                    remaining,
                    self.adapter.call(service, action, parameters),
                )
                .await
                {
                    Ok(envelope) => envelope,
                    Err(_) => ServiceEnvelope::failure(
                        crate::error::ErrorKind::Timeout,
                        format!("request deadline exceeded calling {} '{}'", service.id, action),
                    ),
                }
            }
            None => self.adapter.call(service, action, parameters).await,
        }
    }
}

/// Wire the full agent graph.
pub fn build_agent_graph() -> Result<CompiledGraph<AgentDeps>, String> {
    GraphBuilder::new()
        .add_node("get_schema", |s, d| nodes::schema::get_schema_node(s, d).boxed())
        .add_node("discover_services", |s, d| {
            nodes::discover::discover_services_node(s, d).boxed()
        })
        .add_node("analyze_request", |s, d| {
            nodes::analyze::analyze_request_node(s, d).boxed()
        })
        .add_node("execute_mcp_queries", |s, d| {
            nodes::mcp::execute_mcp_queries_node(s, d).boxed()
        })
        .add_node("process_search_results", |s, d| {
            nodes::search::process_search_results_with_download_node(s, d).boxed()
        })
        .add_node("retrieve_documents", |s, d| {
            nodes::rag::retrieve_documents_node(s, d).boxed()
        })
        .add_node("augment_context", |s, d| {
            nodes::augment::augment_context_node(s, d).boxed()
        })
        .add_node("generate_sql", |s, d| {
            nodes::sql_generate::generate_sql_node(s, d).boxed()
        })
        .add_node("validate_sql", |s, d| {
            nodes::sql_validate::validate_sql_node(s, d).boxed()
        })
        .add_node("execute_sql", |s, d| {
            nodes::sql_execute::execute_sql_node(s, d).boxed()
        })
        .add_node("refine_sql", |s, d| {
            nodes::sql_generate::refine_sql_node(s, d).boxed()
        })
        .add_node("generate_wider_search_query", |s, d| {
            nodes::sql_generate::generate_wider_search_query_node(s, d).boxed()
        })
        .add_node("execute_wider_search", |s, d| {
            nodes::sql_execute::execute_wider_search_node(s, d).boxed()
        })
        .add_node("generate_prompt", |s, d| {
            nodes::respond::generate_prompt_node(s, d).boxed()
        })
        .add_node("generate_response", |s, d| {
            nodes::respond::generate_response_node(s, d).boxed()
        })
        .add_edge("get_schema", "discover_services")
        .add_edge("discover_services", "analyze_request")
        .add_conditional_edges(
            "analyze_request",
            routers::route_after_analysis,
            &[
                ("mcp", "execute_mcp_queries"),
                ("sql", "generate_sql"),
                ("respond", "generate_prompt"),
            ],
        )
        .add_conditional_edges(
            "execute_mcp_queries",
            routers::route_after_mcp,
            &[
                ("search", "process_search_results"),
                ("documents", "retrieve_documents"),
                ("augment", "augment_context"),
            ],
        )
        .add_edge("process_search_results", "retrieve_documents")
        .add_edge("retrieve_documents", "augment_context")
        .add_conditional_edges(
            "augment_context",
            routers::route_after_augment,
            &[("sql", "generate_sql"), ("respond", "generate_prompt")],
        )
        .add_edge("generate_sql", "validate_sql")
        .add_conditional_edges(
            "validate_sql",
            routers::route_after_validation,
            &[
                ("refine", "refine_sql"),
                ("wider", "execute_wider_search"),
                ("execute", "execute_sql"),
            ],
        )
        .add_conditional_edges(
            "execute_sql",
            routers::route_after_execution,
            &[
                ("refine", "refine_sql"),
                ("widen", "generate_wider_search_query"),
                ("respond", "generate_prompt"),
            ],
        )
        .add_conditional_edges(
            "generate_wider_search_query",
            routers::route_after_wider_generation,
            &[
                ("validate", "validate_sql"),
                ("respond", "generate_response"),
            ],
        )
        .add_conditional_edges(
            "execute_wider_search",
            routers::route_after_wider_execution,
            &[
                ("refine", "refine_sql"),
                ("widen", "generate_wider_search_query"),
                ("respond", "generate_prompt"),
            ],
        )
        .add_conditional_edges(
            "refine_sql",
            routers::route_after_refinement,
            &[
                ("validate", "validate_sql"),
                ("respond", "generate_response"),
            ],
        )
        .add_edge("generate_prompt", "generate_response")
        .add_edge("generate_response", END)
        .set_entry_point("get_schema")
        .build()
}

/// What a completed run reports back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub original_request: String,
    pub generated_sql: String,
    pub previous_sql_queries: Vec<String>,
    pub db_results: Vec<RowObject>,
    pub all_db_results: HashMap<String, Vec<RowObject>>,
    pub mcp_service_results: Vec<McpServiceResult>,
    pub response_prompt: String,
    pub final_response: String,
    pub validation_error: Option<String>,
    pub execution_error: Option<String>,
    pub sql_generation_error: Option<String>,
    pub retry_count: u32,
    pub query_type: QueryType,
}

impl RunOutcome {
    fn from_state(state: AgentState) -> Self {
        Self {
            original_request: state.user_request,
            generated_sql: state.sql_query,
            previous_sql_queries: state.previous_sql_queries,
            db_results: state.db_results,
            all_db_results: state.all_db_results,
            mcp_service_results: state.mcp_service_results,
            response_prompt: state.response_prompt,
            final_response: state.final_response,
            validation_error: state.validation_error,
            execution_error: state.execution_error,
            sql_generation_error: state.sql_generation_error,
            retry_count: state.retry_count,
            query_type: state.query_type,
        }
    }
}

/// Run one request through the graph.
///
/// Malformed envelopes are rejected before graph entry; an empty request
/// short-circuits to a terminal apology without a single LLM call. The
/// returned outcome always carries a non-empty `final_response`.
pub async fn run_agent_request(
    envelope: RequestEnvelope,
    deps: Arc<AgentDeps>,
) -> Result<RunOutcome, String> {
    run_agent_request_on(envelope, None, deps).await
}

/// Like `run_agent_request`, but pinned to one logical database instead of
/// fanning out across all of them.
pub async fn run_agent_request_on(
    envelope: RequestEnvelope,
    target_database: Option<String>,
    deps: Arc<AgentDeps>,
) -> Result<RunOutcome, String> {
    envelope.validate()?;

    if envelope.user_request.trim().is_empty() {
        let mut state = AgentState::new(envelope.user_request);
        state.final_response =
            "I'm sorry - I can't answer an empty request. Please tell me what you \
             would like to know."
                .to_string();
        return Ok(RunOutcome::from_state(state));
    }

    let mut state = AgentState::new(envelope.user_request.clone());
    state.custom_system_prompt = envelope.custom_system_prompt.clone();
    state.disable_sql_blocking = envelope
        .disable_sql_blocking
        .unwrap_or_else(|| deps.settings.default_disable_sql_blocking());
    state.disable_databases = deps.settings.disable_databases;
    state.registry_url = deps.settings.registry_url.clone();
    if let Some(database) = target_database {
        state.database_name = database;
    }

    let run_id = uuid::Uuid::new_v4();
    println!(
        "[Engine] Run {} starting ({} chars), databases {}, blocking {}",
        run_id,
        state.user_request.chars().count(),
        if state.disable_databases { "disabled" } else { "enabled" },
        if state.disable_sql_blocking { "disabled" } else { "enabled" },
    );

    let graph = build_agent_graph()?;
    let final_state = graph
        .invoke(state, DEFAULT_RECURSION_LIMIT, deps)
        .await;

    println!(
        "[Engine] Run {} complete: {} retries, {} SQL candidate(s), {} row(s)",
        run_id,
        final_state.retry_count,
        final_state.previous_sql_queries.len(),
        final_state.db_results.len()
    );
    Ok(RunOutcome::from_state(final_state))
}
