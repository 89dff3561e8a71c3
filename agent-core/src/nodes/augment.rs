//! Evidence-context construction and source resolution.
//!
//! `resolve_source` implements the priority rule every document's `source`
//! goes through: specific metadata keys first, then the top-level source,
//! then the URL hostname, then the title — skipping generic placeholders at
//! every step. `build_evidence` renders documents, database rows and MCP
//! results into the compact context string the synthesizer prompt embeds.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::engine::AgentDeps;
use crate::protocol::{is_generic_source, url_hostname, CallStatus};
use crate::state::AgentState;

/// Metadata keys consulted for a document source, in priority order.
pub const METADATA_SOURCE_KEYS: &[&str] = &[
    "source",
    "file_name",
    "filename",
    "title",
    "url",
    "path",
    "file_path",
    "stored_file_path",
];

/// Cap on database rows rendered into the evidence string.
const MAX_EVIDENCE_ROWS: usize = 20;
/// Cap on characters rendered per document or service result.
const MAX_SNIPPET_CHARS: usize = 800;

/// Resolve the most specific source label available, or None when every
/// candidate is generic.
pub fn resolve_source(
    metadata: &Map<String, Value>,
    top_source: Option<&str>,
    url: Option<&str>,
    title: Option<&str>,
) -> Option<String> {
    for key in METADATA_SOURCE_KEYS {
        if let Some(value) = metadata.get(*key).and_then(Value::as_str) {
            if !is_generic_source(value) {
                return Some(value.to_string());
            }
        }
    }
    if let Some(source) = top_source {
        if !is_generic_source(source) {
            return Some(source.to_string());
        }
    }
    if let Some(url) = url {
        if let Some(host) = url_hostname(url) {
            return Some(host);
        }
    }
    if let Some(title) = title {
        if !is_generic_source(title) {
            return Some(title.to_string());
        }
    }
    None
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Render the gathered evidence into one compact string. Also repairs any
/// document whose source slipped through as a generic placeholder.
pub fn build_evidence(state: &mut AgentState) -> String {
    let mut evidence = String::new();

    if !state.rag_documents.is_empty() {
        evidence.push_str("=== Retrieved documents ===\n");
        for (index, document) in state.rag_documents.iter_mut().enumerate() {
            if is_generic_source(&document.source) {
                document.source = resolve_source(
                    &document.metadata,
                    None,
                    document.url.as_deref(),
                    document.title.as_deref(),
                )
                .unwrap_or_else(|| "unattributed document".to_string());
            }
            let score = document
                .relevance_score
                .map(|s| format!(" (relevance {:.2})", s))
                .unwrap_or_default();
            let body = document
                .summary
                .as_deref()
                .unwrap_or(document.content.as_str());
            evidence.push_str(&format!(
                "[{}] {}{}\n{}\n\n",
                index + 1,
                document.source,
                score,
                clip(body, MAX_SNIPPET_CHARS)
            ));
        }
    }

    if !state.db_results.is_empty() {
        evidence.push_str(&format!(
            "=== Database rows ({} total) ===\n",
            state.db_results.len()
        ));
        for row in state.db_results.iter().take(MAX_EVIDENCE_ROWS) {
            evidence.push_str(
                &serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string()),
            );
            evidence.push('\n');
        }
        if state.db_results.len() > MAX_EVIDENCE_ROWS {
            evidence.push_str(&format!(
                "… and {} more row(s)\n",
                state.db_results.len() - MAX_EVIDENCE_ROWS
            ));
        }
        evidence.push('\n');
    }

    if !state.mcp_service_results.is_empty() {
        evidence.push_str("=== Service results ===\n");
        for result in &state.mcp_service_results {
            match result.status {
                CallStatus::Success if state.return_mcp_results_to_llm => {
                    let rendered = serde_json::to_string(&result.result)
                        .unwrap_or_else(|_| "null".to_string());
                    evidence.push_str(&format!(
                        "- {} {}: {}\n",
                        result.service_id,
                        result.action,
                        clip(&rendered, MAX_SNIPPET_CHARS)
                    ));
                }
                CallStatus::Success => {
                    evidence.push_str(&format!(
                        "- {} {}: succeeded\n",
                        result.service_id, result.action
                    ));
                }
                CallStatus::Error => {
                    evidence.push_str(&format!(
                        "- {} {}: failed ({})\n",
                        result.service_id,
                        result.action,
                        result.error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
        }
    }

    evidence
}

/// Node wrapper: store the evidence string in the state.
pub async fn augment_context_node(
    mut state: AgentState,
    _deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    let evidence = build_evidence(&mut state);
    println!("[AugmentContext] Evidence context is {} chars", evidence.len());
    state.augmented_context = evidence;
    Ok(state)
}
