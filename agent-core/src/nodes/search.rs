//! Search-result enrichment node.
//!
//! For every hit produced by a search-type service: fetch the page body
//! through the download worker, summarize it in the context of the user's
//! question, then rerank the summarized results by relevance. Each enriched
//! hit becomes a `processed_search` UnifiedDocument whose source is the
//! URL's hostname (or the hit title when there is no URL).

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Map, Value};

use crate::engine::AgentDeps;
use crate::nodes::augment::resolve_source;
use crate::nodes::service_type_of;
use crate::protocol::{ServiceInfo, SourceType, UnifiedDocument};
use crate::services::flatten_search_results;
use crate::settings::LlmRole;
use crate::state::AgentState;

/// Cap on hits enriched per run; downloads and summaries are not free.
pub const MAX_PROCESSED_RESULTS: usize = 5;

/// True when this result came from a search-type service.
pub fn is_search_result(state: &AgentState, service_id: &str, action: &str) -> bool {
    service_type_of(state, service_id)
        .map(|t| t.contains("search"))
        .unwrap_or(false)
        || action.contains("search")
}

pub async fn process_search_results_with_download_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    let mut hits: Vec<(String, Value)> = Vec::new();
    for result in &state.mcp_service_results {
        if !matches!(result.status, crate::protocol::CallStatus::Success) {
            continue;
        }
        if !is_search_result(&state, &result.service_id, &result.action) {
            continue;
        }
        for hit in flatten_search_results(&result.result) {
            hits.push((result.service_id.clone(), hit));
        }
    }

    if hits.is_empty() {
        println!("[ProcessSearch] No search hits to enrich");
        return Ok(state);
    }
    if hits.len() > MAX_PROCESSED_RESULTS {
        println!(
            "[ProcessSearch] Capping enrichment at {} of {} hit(s)",
            MAX_PROCESSED_RESULTS,
            hits.len()
        );
        hits.truncate(MAX_PROCESSED_RESULTS);
    }

    let download_service = state
        .discovered_services
        .iter()
        .find(|s| s.service_type.contains("download"))
        .cloned();
    if download_service.is_none() {
        println!("[ProcessSearch] No download service discovered; using search snippets");
    }

    let user_request = state.user_request.clone();
    let futures = hits.into_iter().map(|(service_id, hit)| {
        let deps = deps.clone();
        let download = download_service.clone();
        let user_request = user_request.clone();
        async move { enrich_hit(deps, download, user_request, service_id, hit).await }
    });

    let mut documents: Vec<UnifiedDocument> =
        join_all(futures).await.into_iter().flatten().collect();

    // Rerank by relevance score, best first. Unscored documents sink.
    documents.sort_by(|a, b| {
        b.relevance_score
            .unwrap_or(0.0)
            .partial_cmp(&a.relevance_score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    println!(
        "[ProcessSearch] Enriched {} search hit(s) into documents",
        documents.len()
    );
    state.rag_documents.extend(documents);
    Ok(state)
}

async fn enrich_hit(
    deps: Arc<AgentDeps>,
    download_service: Option<ServiceInfo>,
    user_request: String,
    service_id: String,
    hit: Value,
) -> Option<UnifiedDocument> {
    let url = hit.get("url").and_then(Value::as_str).map(str::to_string);
    let title = hit.get("title").and_then(Value::as_str).map(str::to_string);
    let snippet = hit
        .get("description")
        .or_else(|| hit.get("snippet"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Page body via the download worker; the snippet is the fallback.
    let mut content = snippet.clone();
    if let (Some(service), Some(url)) = (&download_service, url.as_deref()) {
        let envelope = deps
            .call_service(service, "download_url", json!({ "url": url }))
            .await;
        if envelope.is_success() {
            let body = envelope
                .result
                .get("content")
                .or_else(|| envelope.result.get("text"))
                .or_else(|| envelope.result.get("body"))
                .and_then(Value::as_str);
            if let Some(body) = body {
                content = body.to_string();
            }
        } else {
            println!(
                "[ProcessSearch] Download of {} failed: {}",
                url,
                envelope.error.as_deref().unwrap_or("unknown")
            );
        }
    }

    if content.trim().is_empty() {
        return None;
    }

    // Summarize in the context of the question; a failure keeps raw content.
    let summary_prompt = format!(
        "Summarize the following page content strictly in the context of the \
         question. Keep facts, numbers and names.\n\nQuestion: {}\n\nContent:\n{}",
        user_request,
        truncate(&content, 6000)
    );
    let summary = deps.complete(LlmRole::Default, &summary_prompt).await.ok();

    // Relevance score for reranking.
    let score_prompt = format!(
        "On a scale from 0.0 to 1.0, how relevant is this text to the \
         question? Reply with only the number.\n\nQuestion: {}\n\nText:\n{}",
        user_request,
        truncate(summary.as_deref().unwrap_or(&content), 2000)
    );
    let relevance_score = match deps.complete(LlmRole::Prompt, &score_prompt).await {
        Ok(reply) => reply.trim().parse::<f64>().ok(),
        Err(_) => None,
    };

    let mut metadata = Map::new();
    metadata.insert("service_used".to_string(), json!(service_id));
    metadata.insert("raw_result".to_string(), hit.clone());
    if let Some(d) = hit.get("date") {
        metadata.insert("date".to_string(), d.clone());
    }

    // Hostname first, hit title second; the enrichment service id is never
    // an acceptable source.
    let source = resolve_source(&Map::new(), None, url.as_deref(), title.as_deref())
        .unwrap_or_else(|| format!("search:{}", service_id));

    Some(UnifiedDocument {
        content,
        source,
        source_type: SourceType::ProcessedSearch,
        url,
        title,
        summary,
        relevance_score,
        metadata,
    })
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("привет мир", 6), "привет");
        assert_eq!(truncate("short", 100), "short");
    }
}
