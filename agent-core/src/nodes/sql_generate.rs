//! SQL generation, refinement and widening nodes.

use std::sync::Arc;

use crate::engine::AgentDeps;
use crate::nodes::schema::format_schema_dump;
use crate::settings::LlmRole;
use crate::sql::extract_sql_statement;
use crate::state::{AgentState, QueryType};

fn previous_queries_block(state: &AgentState) -> String {
    if state.previous_sql_queries.is_empty() {
        return String::new();
    }
    let mut block = String::from(
        "\nQueries already tried this run (do not repeat them):\n",
    );
    for sql in &state.previous_sql_queries {
        block.push_str(&format!("  - {}\n", sql));
    }
    block
}

/// Generate the initial SQL candidate from the user request and schema.
pub async fn generate_sql_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    if state.disable_databases {
        println!("[GenerateSql] Databases disabled; leaving sql_query empty");
        return Ok(state);
    }

    let prompt = format!(
        "Generate a single SQL SELECT statement answering the user request.\n\
         Only SELECT (or WITH) statements are allowed; no DDL or DML.\n\
         \nUser request: {}\n\
         \nDatabase schema:\n{}\
         {}\
         \nReply with only the SQL statement.",
        state.user_request,
        format_schema_dump(&state.schema_dump),
        previous_queries_block(&state)
    );

    match deps.complete(LlmRole::Sql, &prompt).await {
        Ok(reply) => {
            let sql = extract_sql_statement(&reply);
            if sql.is_empty() {
                println!("[GenerateSql] No SQL could be extracted from the reply");
                state.sql_generation_error =
                    Some("No SQL could be extracted from the model reply".to_string());
                state.retry_count += 1;
            } else {
                println!("[GenerateSql] Candidate: {}", sql);
                state.record_sql_candidate(sql);
                state.sql_generation_error = None;
                state.query_type = QueryType::Initial;
            }
        }
        Err(e) => {
            state.sql_generation_error = Some(format!("Error generating SQL: {}", e));
            state.retry_count += 1;
        }
    }
    Ok(state)
}

/// Refine the current candidate using the error that failed it.
///
/// Consumes the active error slot; the refined candidate goes back through
/// validation. The query type is preserved so a widened query stays widened.
pub async fn refine_sql_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    let error_context = state
        .consume_error()
        .map(|e| e.message)
        .unwrap_or_else(|| "previous attempt produced no usable SQL".to_string());

    let prompt = if state.sql_query.trim().is_empty() {
        format!(
            "Generate a single SQL SELECT statement answering the user request.\n\
             The previous attempt failed with: {}\n\
             \nUser request: {}\n\
             \nDatabase schema:\n{}\
             \nReply with only the SQL statement.",
            error_context,
            state.user_request,
            format_schema_dump(&state.schema_dump)
        )
    } else {
        format!(
            "The SQL query below failed. Generate a corrected SELECT statement \
             that still answers the original request.\n\
             \nOriginal user request: {}\n\
             \nFailed SQL query: {}\n\
             \nError encountered: {}\n\
             \nDatabase schema:\n{}\
             \nReply with only the corrected SQL statement.",
            state.user_request,
            state.sql_query,
            error_context,
            format_schema_dump(&state.schema_dump)
        )
    };

    match deps.complete(LlmRole::Sql, &prompt).await {
        Ok(reply) => {
            let sql = extract_sql_statement(&reply);
            if sql.is_empty() {
                state.sql_generation_error =
                    Some("Refinement produced no usable SQL".to_string());
            } else {
                println!("[RefineSql] Refined candidate: {}", sql);
                state.record_sql_candidate(sql);
            }
        }
        Err(e) => {
            state.sql_generation_error = Some(format!("Error refining SQL: {}", e));
        }
    }
    Ok(state)
}

/// Produce a broader candidate after the initial query returned zero rows.
///
/// The prompt LLM proposes widening strategies (relaxed filters, synonyms,
/// wider ranges); the SQL LLM realizes them. The retry counter moves so the
/// widening loop cannot spin forever.
pub async fn generate_wider_search_query_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    state.retry_count += 1;
    state.query_type = QueryType::WiderSearch;

    let strategy_prompt = format!(
        "The SQL query below answered the user's request but returned no rows.\n\
         Suggest alternative search strategies: relax filters, try synonyms or \
         related values, widen ranges.\n\
         \nOriginal user request: {}\n\
         \nInitial SQL query: {}\n\
         \nDatabase schema:\n{}",
        state.user_request,
        state.sql_query,
        format_schema_dump(&state.schema_dump)
    );

    let strategies = match deps.complete(LlmRole::Prompt, &strategy_prompt).await {
        Ok(text) => text,
        Err(e) => {
            println!("[WiderSearch] Strategy generation failed: {}", e);
            state.final_response = "I couldn't find any results for your query. The \
                 database doesn't contain the information requested."
                .to_string();
            return Ok(state);
        }
    };

    let sql_prompt = format!(
        "{}\n\nBased on these suggestions, generate a single broader SQL SELECT \
         statement for the request: {}\n\
         {}\
         \nDatabase schema:\n{}\
         \nReply with only the SQL statement.",
        strategies,
        state.user_request,
        previous_queries_block(&state),
        format_schema_dump(&state.schema_dump)
    );

    match deps.complete(LlmRole::Sql, &sql_prompt).await {
        Ok(reply) => {
            let sql = extract_sql_statement(&reply);
            if sql.is_empty() {
                state.final_response = "I couldn't find any results for your query. The \
                     database doesn't contain the information requested."
                    .to_string();
            } else {
                println!("[WiderSearch] Widened candidate: {}", sql);
                state.record_sql_candidate(sql);
            }
        }
        Err(e) => {
            println!("[WiderSearch] Widened SQL generation failed: {}", e);
            state.final_response = "I couldn't find any results for your query. The \
                 database doesn't contain the information requested."
                .to_string();
        }
    }
    Ok(state)
}
