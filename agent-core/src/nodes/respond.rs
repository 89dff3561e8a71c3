//! Prompt build and response synthesis nodes.

use std::sync::Arc;

use crate::engine::AgentDeps;
use crate::nodes::augment::build_evidence;
use crate::settings::LlmRole;
use crate::state::AgentState;

/// Build the synthesizer prompt from the user request, the evidence context
/// and the execution trail.
pub async fn generate_prompt_node(
    mut state: AgentState,
    _deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    let evidence = build_evidence(&mut state);
    state.augmented_context = evidence.clone();

    let mut prompt = String::new();
    if let Some(custom) = &state.custom_system_prompt {
        prompt.push_str(custom);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "Answer the user's request using only the evidence below. Name the \
         sources you drew on. If the evidence does not contain the answer, \
         say so plainly.\n\nUser request: {}\n",
        state.user_request
    ));

    if !state.sql_query.is_empty() {
        prompt.push_str(&format!("\nSQL executed: {}\n", state.sql_query));
        if state.query_type == crate::state::QueryType::WiderSearch {
            prompt.push_str(
                "(The initial query returned nothing; this is a widened search, \
                 so mention that the criteria were broadened.)\n",
            );
        }
    }

    if evidence.is_empty() {
        prompt.push_str("\nNo evidence was gathered for this request.\n");
    } else {
        prompt.push_str(&format!("\nEvidence:\n{}", evidence));
    }

    println!("[GeneratePrompt] Synthesizer prompt is {} chars", prompt.len());
    state.response_prompt = prompt;
    Ok(state)
}

/// Terminal node: produce `final_response`. Always populates it — an LLM
/// failure or an exhausted retry budget yields an apologetic answer carrying
/// the most recent error's one-sentence reason.
pub async fn generate_response_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    // A widening dead-end may already have written the final text.
    if !state.final_response.is_empty() {
        return Ok(state);
    }

    if state.response_prompt.is_empty() {
        state.final_response = apologetic_response(&state);
        println!("[GenerateResponse] No prompt built; answering apologetically");
        return Ok(state);
    }

    match deps.complete(LlmRole::Response, &state.response_prompt).await {
        Ok(text) if !text.trim().is_empty() => {
            state.final_response = text.trim().to_string();
        }
        Ok(_) => {
            state.final_response = apologetic_response(&state);
        }
        Err(e) => {
            println!("[GenerateResponse] Response LLM failed: {}", e);
            state.final_response = format!(
                "I gathered the evidence but could not synthesize a final answer \
                 (the response model failed: {}).",
                e
            );
        }
    }
    Ok(state)
}

/// The graceful refusal: one sentence of reason from the most recent error.
fn apologetic_response(state: &AgentState) -> String {
    let reason = state
        .active_error()
        .or_else(|| state.last_error.clone())
        .map(|e| e.message)
        .unwrap_or_else(|| "no usable evidence could be gathered".to_string());
    format!(
        "I'm sorry - I couldn't complete your request: {}.",
        reason.trim_end_matches('.')
    )
}
