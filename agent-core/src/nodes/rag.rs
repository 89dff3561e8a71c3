//! Document retrieval node.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::engine::AgentDeps;
use crate::nodes::augment::resolve_source;
use crate::nodes::service_type_of;
use crate::protocol::{SourceType, UnifiedDocument};
use crate::services::flatten_search_results;
use crate::state::AgentState;

/// True when the plan asked for RAG retrieval.
pub fn rag_was_planned(state: &AgentState) -> bool {
    state.mcp_tool_calls.iter().any(|call| {
        service_type_of(state, &call.service_id)
            .map(|t| t.contains("rag"))
            .unwrap_or(false)
            || call.action.contains("query_documents")
    })
}

/// Query the RAG collaborator and merge the returned documents with any
/// processed search results already in `rag_documents`.
pub async fn retrieve_documents_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    if !rag_was_planned(&state) {
        return Ok(state);
    }

    let service = match state
        .discovered_services
        .iter()
        .find(|s| s.service_type.contains("rag"))
        .cloned()
    {
        Some(service) => service,
        None => {
            println!("[RetrieveDocuments] RAG planned but no rag service discovered");
            return Ok(state);
        }
    };

    let envelope = deps
        .call_service(
            &service,
            "query_documents",
            json!({
                "query": state.user_request,
                "top_k": deps.settings.rag.top_k_results
            }),
        )
        .await;

    if !envelope.is_success() {
        println!(
            "[RetrieveDocuments] RAG query failed: {}",
            envelope.error.as_deref().unwrap_or("unknown")
        );
        return Ok(state);
    }

    let items = match envelope.result.get("documents").and_then(Value::as_array) {
        Some(documents) => documents.clone(),
        None => flatten_search_results(&envelope.result),
    };

    let mut added = 0usize;
    for item in items {
        if let Some(document) = to_unified_document(&item, &deps.settings.rag.collection_name) {
            state.rag_documents.push(document);
            added += 1;
        }
    }
    println!(
        "[RetrieveDocuments] Merged {} RAG document(s); {} total",
        added,
        state.rag_documents.len()
    );
    Ok(state)
}

fn to_unified_document(item: &Value, collection_name: &str) -> Option<UnifiedDocument> {
    let content = item
        .get("content")
        .or_else(|| item.get("text"))
        .and_then(Value::as_str)?
        .to_string();
    if content.trim().is_empty() {
        return None;
    }

    let metadata = item
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);
    let top_source = item.get("source").and_then(Value::as_str);
    let url = item.get("url").and_then(Value::as_str);
    let title = item
        .get("title")
        .and_then(Value::as_str)
        .or_else(|| metadata.get("title").and_then(Value::as_str));
    let relevance_score = item
        .get("relevance_score")
        .or_else(|| item.get("score"))
        .and_then(Value::as_f64);

    let source = resolve_source(&metadata, top_source, url, title)
        .unwrap_or_else(|| format!("collection:{}", collection_name));

    Some(UnifiedDocument {
        content,
        source,
        source_type: SourceType::LocalDocument,
        url: url.map(str::to_string),
        title: title.map(str::to_string),
        summary: None,
        relevance_score,
        metadata,
    })
}
