//! Boundary behaviors: malformed envelopes and degenerate requests.

use crate::engine::run_agent_request;
use crate::llm::LlmRouter;
use crate::protocol::{RequestEnvelope, MAX_CUSTOM_PROMPT_CHARS};
use crate::settings::LlmRole;

use super::support::{test_deps, EchoBackend, ScriptedBackend};

#[tokio::test]
async fn test_empty_request_apologizes_without_llm_calls() {
    let sql = ScriptedBackend::new("sql", &["SELECT 1"]);
    let response = EchoBackend::new();
    let llm = LlmRouter::empty()
        .with_backend(LlmRole::Sql, sql.clone())
        .with_backend(LlmRole::Response, response.clone());
    let deps = test_deps(llm, Vec::new(), None);

    let outcome = run_agent_request(RequestEnvelope::new("   "), deps)
        .await
        .unwrap();

    assert!(!outcome.final_response.is_empty());
    assert!(outcome.final_response.contains("empty request"));
    assert_eq!(sql.calls(), 0);
    assert_eq!(response.calls(), 0);
}

#[tokio::test]
async fn test_oversized_custom_prompt_is_rejected_before_graph_entry() {
    let response = EchoBackend::new();
    let llm = LlmRouter::empty().with_backend(LlmRole::Response, response.clone());
    let deps = test_deps(llm, Vec::new(), None);

    let mut envelope = RequestEnvelope::new("list contacts");
    envelope.custom_system_prompt = Some("x".repeat(MAX_CUSTOM_PROMPT_CHARS + 1));

    let error = run_agent_request(envelope, deps).await.unwrap_err();
    assert!(error.contains("5000"));
    assert_eq!(response.calls(), 0);
}

#[tokio::test]
async fn test_maximum_length_custom_prompt_is_accepted() {
    let response = EchoBackend::new();
    let llm = LlmRouter::empty().with_backend(LlmRole::Response, response.clone());
    let deps = test_deps(llm, Vec::new(), None);

    let mut envelope = RequestEnvelope::new("hello there");
    envelope.custom_system_prompt = Some("с".repeat(MAX_CUSTOM_PROMPT_CHARS));

    let outcome = run_agent_request(envelope, deps).await.unwrap();
    assert!(!outcome.final_response.is_empty());
    assert_eq!(response.calls(), 1);
}

#[tokio::test]
async fn test_non_ascii_request_survives_the_whole_run() {
    let response = EchoBackend::new();
    let llm = LlmRouter::empty().with_backend(LlmRole::Response, response);
    let deps = test_deps(llm, Vec::new(), None);

    let request = "найди в локальных документах требования к базам 生物识别";
    let outcome = run_agent_request(RequestEnvelope::new(request), deps)
        .await
        .unwrap();

    assert_eq!(outcome.original_request, request);
    // The echoed synthesizer prompt carries the request verbatim.
    assert!(outcome.final_response.contains(request));
}
