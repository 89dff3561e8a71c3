//! SQL execution nodes.
//!
//! Sanitizes the current candidate, works out which databases hold the
//! referenced tables, validates table and column existence per database, and
//! executes on every database containing at least one referenced table. For
//! a cross-database query, a single database's failure is tolerated; for a
//! single-database query it fails the node.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::engine::AgentDeps;
use crate::protocol::{RowObject, SchemaDump, SOURCE_DATABASE_KEY};
use crate::sql::{extract_table_references, sanitize_sql, validate_against_schema};
use crate::state::AgentState;

enum DbOutcome {
    Rows(Vec<RowObject>),
    ValidationFailed(String),
    ExecutionFailed(String),
}

/// Execute the current candidate across the appropriate databases.
pub async fn execute_sql_node(
    state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    run_current_query(state, deps, "ExecuteSql").await
}

/// Execute a widened candidate; identical mechanics, separate node so the
/// graph can route the two differently.
pub async fn execute_wider_search_node(
    state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    run_current_query(state, deps, "ExecuteWiderSearch").await
}

async fn run_current_query(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
    tag: &str,
) -> Result<AgentState, String> {
    if state.disable_databases {
        println!("[{}] Databases disabled; no rows", tag);
        state.db_results.clear();
        state.all_db_results.clear();
        return Ok(state);
    }

    let sanitized = sanitize_sql(&state.sql_query);
    if sanitized != state.sql_query {
        println!("[{}] Sanitized query: {}", tag, sanitized);
    }

    let tables = extract_table_references(&sanitized);
    let all_databases = deps.databases.list_databases();

    // Which databases hold at least one referenced table. Schemas that fail
    // to load are skipped; partial visibility is fine.
    let mut schemas: HashMap<String, SchemaDump> = HashMap::new();
    let mut tables_by_db: HashMap<String, Vec<String>> = HashMap::new();
    for db_name in &all_databases {
        let schema = match deps.databases.get_schema_dump(db_name).await {
            Ok(schema) => schema,
            Err(e) => {
                println!("[{}] Schema for '{}' unavailable: {}", tag, db_name, e);
                continue;
            }
        };
        for table in &tables {
            if schema.keys().any(|t| t.eq_ignore_ascii_case(table)) {
                tables_by_db
                    .entry(db_name.clone())
                    .or_default()
                    .push(table.clone());
            }
        }
        schemas.insert(db_name.clone(), schema);
    }

    // Tables that exist nowhere fail the candidate before any execution.
    let mut missing = Vec::new();
    for table in &tables {
        let found = tables_by_db.values().flatten().any(|t| t == table);
        if !found {
            missing.push(table.clone());
        }
    }
    if !missing.is_empty() {
        let message = format!(
            "Tables do not exist in any configured database: {}",
            missing.join(", ")
        );
        println!("[{}] {}", tag, message);
        state.validation_error = Some(message);
        state.retry_count += 1;
        return Ok(state);
    }

    let mut targets: Vec<String> = all_databases
        .iter()
        .filter(|db| tables_by_db.contains_key(*db))
        .cloned()
        .collect();
    // A run pinned to one logical database does not fan out.
    if state.database_name != "all_databases" {
        targets.retain(|db| db.eq_ignore_ascii_case(&state.database_name));
    }
    // A statement without table references (SELECT 1) runs on one database:
    // the pinned one, or the primary.
    if targets.is_empty() {
        let fallback = if state.database_name != "all_databases" {
            all_databases
                .iter()
                .find(|db| db.eq_ignore_ascii_case(&state.database_name))
        } else {
            all_databases.first()
        };
        match fallback {
            Some(db) => targets.push(db.clone()),
            None => {
                state.execution_error =
                    Some("No databases are configured for execution".to_string());
                state.retry_count += 1;
                return Ok(state);
            }
        }
    }

    let is_cross_database = targets.len() > 1;
    if is_cross_database {
        println!(
            "[{}] Cross-database query across: {}",
            tag,
            targets.join(", ")
        );
    }

    let mapping = state.table_to_db_mapping.clone();
    let futures = targets.iter().map(|db_name| {
        let deps = deps.clone();
        let sanitized = sanitized.clone();
        let schema = schemas.get(db_name).cloned().unwrap_or_default();
        let mapping = mapping.clone();
        let db_name = db_name.clone();
        async move {
            if let Err(e) =
                validate_against_schema(&sanitized, &db_name, &schema, Some(&mapping))
            {
                return (db_name, DbOutcome::ValidationFailed(e));
            }
            match deps.databases.execute_query(&db_name, &sanitized).await {
                Ok(rows) => (db_name, DbOutcome::Rows(rows)),
                Err(e) => (db_name, DbOutcome::ExecutionFailed(e)),
            }
        }
    });

    let outcomes = join_all(futures).await;

    let mut all_db_results: HashMap<String, Vec<RowObject>> = HashMap::new();
    let mut combined: Vec<RowObject> = Vec::new();
    for (db_name, outcome) in outcomes {
        match outcome {
            DbOutcome::Rows(rows) => {
                println!("[{}] '{}' returned {} row(s)", tag, db_name, rows.len());
                let tagged: Vec<RowObject> = rows
                    .into_iter()
                    .map(|mut row| {
                        row.insert(
                            SOURCE_DATABASE_KEY.to_string(),
                            Value::String(db_name.clone()),
                        );
                        row
                    })
                    .collect();
                combined.extend(tagged.iter().cloned());
                all_db_results.insert(db_name, tagged);
            }
            DbOutcome::ValidationFailed(e) => {
                if is_cross_database {
                    println!(
                        "[{}] Validation on '{}' failed (tolerated for cross-database): {}",
                        tag, db_name, e
                    );
                    all_db_results.insert(db_name, Vec::new());
                } else {
                    println!("[{}] Validation failed on '{}': {}", tag, db_name, e);
                    state.validation_error = Some(e);
                    state.retry_count += 1;
                    return Ok(state);
                }
            }
            DbOutcome::ExecutionFailed(e) => {
                if is_cross_database {
                    println!(
                        "[{}] Execution on '{}' failed (tolerated for cross-database): {}",
                        tag, db_name, e
                    );
                    all_db_results.insert(db_name, Vec::new());
                } else {
                    println!("[{}] Execution failed on '{}': {}", tag, db_name, e);
                    state.execution_error = Some(format!(
                        "SQL execution error on '{}' database: {}",
                        db_name, e
                    ));
                    state.retry_count += 1;
                    return Ok(state);
                }
            }
        }
    }

    println!(
        "[{}] {} total row(s) from {} database(s)",
        tag,
        combined.len(),
        all_db_results.len()
    );
    state.db_results = combined;
    state.all_db_results = all_db_results;
    state.execution_error = None;
    Ok(state)
}
