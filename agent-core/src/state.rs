//! Agent state.
//!
//! The single mutable value threaded through the graph. Nodes receive it by
//! value, mutate their slice of it, and hand it back; routers read it to pick
//! the next edge. There is no other channel between nodes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, TaggedError};
use crate::protocol::{
    McpServiceResult, PlannedToolCall, RowObject, SchemaDump, ServiceInfo, UnifiedDocument,
};

/// Whether the current SQL candidate is the first attempt or a widened one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Initial,
    WiderSearch,
}

impl Default for QueryType {
    fn default() -> Self {
        QueryType::Initial
    }
}

/// State definition for the agent graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentState {
    /// The raw user question.
    pub user_request: String,
    /// Optional caller-supplied system prompt (validated before graph entry).
    pub custom_system_prompt: Option<String>,
    /// Combined schema across all configured databases, table name keyed.
    pub schema_dump: SchemaDump,
    /// Table name -> logical database name, used to route queries.
    pub table_to_db_mapping: HashMap<String, String>,
    /// Current candidate SQL statement (may be empty).
    pub sql_query: String,
    /// Every candidate produced this run, in generation order.
    pub previous_sql_queries: Vec<String>,
    /// Flat rows across databases; each carries `_source_database`.
    pub db_results: Vec<RowObject>,
    /// Rows grouped by the database that produced them.
    pub all_db_results: HashMap<String, Vec<RowObject>>,
    /// Tool calls planned by the request analyzer, in request order.
    pub mcp_tool_calls: Vec<PlannedToolCall>,
    /// Outcomes of executed tool calls, in request order.
    pub mcp_service_results: Vec<McpServiceResult>,
    /// Unified documents gathered from RAG and processed search results.
    pub rag_documents: Vec<UnifiedDocument>,
    /// Compact evidence string built from documents, rows and MCP results.
    pub augmented_context: String,
    /// Synthesizer prompt built from the gathered evidence.
    pub response_prompt: String,
    /// The user-facing answer; populated by the terminal node.
    pub final_response: String,

    // Error slots. At most one is non-null when a routing decision runs;
    // the node a router hands the error to consumes and clears it.
    pub validation_error: Option<String>,
    pub execution_error: Option<String>,
    pub sql_generation_error: Option<String>,
    /// Memo of the most recently consumed error, for the apologetic answer.
    pub last_error: Option<TaggedError>,

    /// Monotonically non-decreasing across the refine and widen loops.
    pub retry_count: u32,
    pub query_type: QueryType,
    pub disable_sql_blocking: bool,
    pub disable_databases: bool,
    /// True iff the analyzer planned at least one tool call.
    pub use_mcp_results: bool,
    /// Whether raw MCP results are echoed back into the synthesizer prompt.
    pub return_mcp_results_to_llm: bool,
    /// Logical database the run targets ("all_databases" for fan-out).
    pub database_name: String,
    pub registry_url: Option<String>,
    pub discovered_services: Vec<ServiceInfo>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            user_request: String::new(),
            custom_system_prompt: None,
            schema_dump: SchemaDump::new(),
            table_to_db_mapping: HashMap::new(),
            sql_query: String::new(),
            previous_sql_queries: Vec::new(),
            db_results: Vec::new(),
            all_db_results: HashMap::new(),
            mcp_tool_calls: Vec::new(),
            mcp_service_results: Vec::new(),
            rag_documents: Vec::new(),
            augmented_context: String::new(),
            response_prompt: String::new(),
            final_response: String::new(),
            validation_error: None,
            execution_error: None,
            sql_generation_error: None,
            last_error: None,
            retry_count: 0,
            query_type: QueryType::Initial,
            disable_sql_blocking: false,
            disable_databases: false,
            use_mcp_results: false,
            return_mcp_results_to_llm: true,
            database_name: "all_databases".to_string(),
            registry_url: None,
            discovered_services: Vec::new(),
        }
    }
}

impl AgentState {
    pub fn new(user_request: impl Into<String>) -> Self {
        Self {
            user_request: user_request.into(),
            ..Self::default()
        }
    }

    /// Adopt a new SQL candidate: set it current and log it in the history.
    pub fn record_sql_candidate(&mut self, sql: impl Into<String>) {
        let sql = sql.into();
        self.sql_query = sql.clone();
        self.previous_sql_queries.push(sql);
    }

    /// The currently set error slot, if any, with its classification.
    pub fn active_error(&self) -> Option<TaggedError> {
        if let Some(msg) = &self.validation_error {
            return Some(TaggedError::new(ErrorKind::Validation, msg.clone()));
        }
        if let Some(msg) = &self.execution_error {
            return Some(TaggedError::new(ErrorKind::Execution, msg.clone()));
        }
        if let Some(msg) = &self.sql_generation_error {
            return Some(TaggedError::new(ErrorKind::Generation, msg.clone()));
        }
        None
    }

    /// Clear all slots, remembering what was set for the apologetic answer.
    ///
    /// Called by the node a router hands the error to.
    pub fn consume_error(&mut self) -> Option<TaggedError> {
        let consumed = self.active_error();
        if let Some(err) = &consumed {
            self.last_error = Some(err.clone());
        }
        self.validation_error = None;
        self.execution_error = None;
        self.sql_generation_error = None;
        consumed
    }

    pub fn has_error(&self) -> bool {
        self.validation_error.is_some()
            || self.execution_error.is_some()
            || self.sql_generation_error.is_some()
    }
}
