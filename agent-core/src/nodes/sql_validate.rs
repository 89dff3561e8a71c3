//! SQL validation node.
//!
//! The safety gate in front of execution. With blocking disabled the gate is
//! open; otherwise the optional security LLM gets first say, and its failure
//! degrades to the keyword/pattern screen, never to acceptance.

use std::sync::Arc;

use serde_json::Value;

use crate::engine::AgentDeps;
use crate::settings::LlmRole;
use crate::sql::screen_sql;
use crate::state::AgentState;

/// Verdict from the security LLM.
fn parse_security_verdict(reply: &str) -> Option<(bool, String)> {
    let value: Value = serde_json::from_str(reply.trim()).ok()?;
    let is_safe = value.get("is_safe")?.as_bool()?;
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((is_safe, reason))
}

async fn security_llm_verdict(
    deps: &AgentDeps,
    sql: &str,
) -> Result<(bool, String), String> {
    let prompt = format!(
        "You are a SQL security auditor. Judge whether this statement is safe \
         to run against a production read-only connection. Unsafe means: any \
         data modification, DDL, system-catalog probing, injection artifacts, \
         time-based probes, or file access.\n\
         \nStatement:\n{}\n\
         \nAnswer with only a JSON object: {{\"is_safe\": true|false, \
         \"reason\": \"<one sentence>\"}}",
        sql
    );
    let reply = deps.complete(LlmRole::Security, &prompt).await?;
    parse_security_verdict(&reply).ok_or_else(|| "security verdict was not valid JSON".to_string())
}

/// Validate the current candidate.
pub async fn validate_sql_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    if state.disable_sql_blocking {
        println!("[ValidateSql] Blocking disabled; validation skipped");
        state.validation_error = None;
        return Ok(state);
    }

    let sql = state.sql_query.clone();
    if sql.trim().is_empty() {
        // A generation error already explains (and counted) the empty
        // candidate; don't stack a second slot or a second retry on it.
        if state.sql_generation_error.is_none() {
            state.validation_error = Some("SQL query is empty".to_string());
            state.retry_count += 1;
        }
        return Ok(state);
    }

    if deps.settings.use_security_llm {
        match security_llm_verdict(&deps, &sql).await {
            Ok((true, _)) => {
                println!("[ValidateSql] Security LLM accepted the candidate");
                state.validation_error = None;
                return Ok(state);
            }
            Ok((false, reason)) => {
                println!("[ValidateSql] Security LLM rejected: {}", reason);
                state.validation_error =
                    Some(format!("Security LLM detected an issue: {}", reason));
                state.retry_count += 1;
                return Ok(state);
            }
            Err(e) => {
                // Degrades to the keyword screen, never to acceptance.
                println!(
                    "[ValidateSql] Security LLM unavailable ({}); falling back to screen",
                    e
                );
            }
        }
    }

    match screen_sql(&sql) {
        Ok(()) => {
            println!("[ValidateSql] Screen passed");
            state.validation_error = None;
        }
        Err(reason) => {
            println!("[ValidateSql] Screen rejected: {}", reason);
            state.validation_error = Some(reason);
            state.retry_count += 1;
        }
    }
    Ok(state)
}
