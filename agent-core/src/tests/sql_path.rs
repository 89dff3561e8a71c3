//! SQL-path scenarios: refinement, widening, sanitization, cross-database
//! tolerance.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::database::{DatabaseHandle, SqlDriver};
use crate::engine::run_agent_request;
use crate::protocol::{RequestEnvelope, RowObject, SchemaDump, SOURCE_DATABASE_KEY};
use crate::settings::{DatabaseKind, LlmRole};
use crate::state::QueryType;

use super::support::{
    sql_router, sqlite_db, sqlite_handle, test_deps, with_role, EchoBackend, ScriptedBackend,
};

#[tokio::test]
async fn test_refinement_succeeds_on_second_attempt() {
    let (_dir, path) = sqlite_db(
        "CREATE TABLE contacts (id INTEGER PRIMARY KEY, name TEXT, phone TEXT); \
         INSERT INTO contacts (name, phone) VALUES \
         ('Alice', '111'), ('Bob', '222'), ('Carol', '333');",
    );

    // First candidate references a column that does not exist; the refined
    // one is correct.
    let sql = ScriptedBackend::new(
        "sql",
        &[
            "SELECT name, phon FROM contacts",
            "SELECT name, phone FROM contacts",
        ],
    );
    let response = EchoBackend::new();
    let deps = test_deps(
        sql_router(sql.clone(), response.clone()),
        vec![sqlite_handle("default", &path)],
        None,
    );

    let outcome = run_agent_request(RequestEnvelope::new("list contact phones"), deps)
        .await
        .unwrap();

    assert_eq!(outcome.previous_sql_queries.len(), 2);
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(outcome.db_results.len(), 3);
    assert!(outcome.validation_error.is_none());
    assert!(outcome.final_response.contains("Alice"));
    for row in &outcome.db_results {
        assert_eq!(row.get(SOURCE_DATABASE_KEY).unwrap(), "default");
    }
}

#[tokio::test]
async fn test_widening_after_empty_initial_result() {
    let (_dir, path) = sqlite_db(
        "CREATE TABLE contacts (id INTEGER PRIMARY KEY, name TEXT, country TEXT); \
         INSERT INTO contacts (name, country) VALUES ('Niila', 'Lemuria');",
    );

    let sql = ScriptedBackend::new(
        "sql",
        &[
            "SELECT * FROM contacts WHERE country = 'Atlantis'",
            "SELECT * FROM contacts WHERE country IN ('Atlantis', 'Lemuria', 'Mu')",
        ],
    );
    let strategies = ScriptedBackend::new(
        "prompt",
        &["Try sibling legendary places: Lemuria and Mu. Relax the equality filter."],
    );
    let response = EchoBackend::new();
    let router = with_role(
        sql_router(sql.clone(), response.clone()),
        LlmRole::Prompt,
        strategies,
    );
    let deps = test_deps(router, vec![sqlite_handle("default", &path)], None);

    let outcome = run_agent_request(
        RequestEnvelope::new("who lives in Atlantis?"),
        deps,
    )
    .await
    .unwrap();

    assert_eq!(outcome.query_type, QueryType::WiderSearch);
    assert!(outcome.previous_sql_queries.len() >= 2);
    assert_eq!(outcome.db_results.len(), 1);
    assert_eq!(outcome.db_results[0].get("name").unwrap(), "Niila");
    // The synthesizer prompt names the widening, and the echoed response
    // carries it through.
    assert!(outcome.response_prompt.contains("broadened"));
    assert!(outcome.final_response.contains("broadened"));
}

#[tokio::test]
async fn test_escaped_quote_candidate_executes_after_sanitization() {
    let (_dir, path) = sqlite_db(
        "CREATE TABLE t (c TEXT); INSERT INTO t (c) VALUES ('x');",
    );

    let sql = ScriptedBackend::new("sql", &[r"SELECT * FROM t WHERE c = \'x\'"]);
    let response = EchoBackend::new();
    let deps = test_deps(
        sql_router(sql, response),
        vec![sqlite_handle("default", &path)],
        None,
    );

    let outcome = run_agent_request(RequestEnvelope::new("find the x row"), deps)
        .await
        .unwrap();

    assert_eq!(outcome.db_results.len(), 1);
    assert_eq!(outcome.db_results[0].get("c").unwrap(), "x");
    assert!(outcome.execution_error.is_none());
}

fn table_schema(columns: &[&str]) -> Value {
    json!({
        "columns": columns
            .iter()
            .map(|c| json!({ "name": c, "type": "TEXT", "nullable": true }))
            .collect::<Vec<_>>()
    })
}

/// Scripted driver: fixed schema, fixed execution outcome. Stands in for a
/// remote database the embedded engine cannot emulate (a side of a
/// cross-database query that succeeds or fails wholesale).
struct ScriptedDriver {
    schema_table: &'static str,
    columns: &'static [&'static str],
    rows: Result<Vec<(&'static str, &'static str)>, &'static str>,
}

impl SqlDriver for ScriptedDriver {
    fn fetch_schema(&self) -> BoxFuture<'_, Result<SchemaDump, String>> {
        Box::pin(async move {
            let mut dump = SchemaDump::new();
            dump.insert(
                self.schema_table.to_string(),
                serde_json::from_value(table_schema(self.columns)).unwrap(),
            );
            Ok(dump)
        })
    }

    fn execute<'a>(&'a self, _sql: &'a str) -> BoxFuture<'a, Result<Vec<RowObject>, String>> {
        Box::pin(async move {
            match &self.rows {
                Ok(rows) => Ok(rows
                    .iter()
                    .map(|(key, value)| {
                        let mut row = RowObject::new();
                        row.insert(key.to_string(), json!(value));
                        row
                    })
                    .collect()),
                Err(e) => Err(e.to_string()),
            }
        })
    }
}

#[tokio::test]
async fn test_cross_database_query_tolerates_one_failing_side() {
    let handles = vec![
        DatabaseHandle {
            name: "crm".to_string(),
            kind: DatabaseKind::Postgresql,
            driver: Arc::new(ScriptedDriver {
                schema_table: "users",
                columns: &["id", "name"],
                rows: Ok(vec![("name", "Alice"), ("name", "Bob")]),
            }),
        },
        DatabaseHandle {
            name: "billing".to_string(),
            kind: DatabaseKind::Postgresql,
            driver: Arc::new(ScriptedDriver {
                schema_table: "orders",
                columns: &["id", "user_id"],
                rows: Err("connection refused"),
            }),
        },
    ];

    let sql = ScriptedBackend::new(
        "sql",
        &["SELECT * FROM users JOIN orders ON users.id = orders.user_id"],
    );
    let response = EchoBackend::new();
    let deps = test_deps(sql_router(sql, response), handles, None);

    let outcome = run_agent_request(
        RequestEnvelope::new("join users with their orders"),
        deps,
    )
    .await
    .unwrap();

    // The failing side is tolerated; the answer is grounded in the side
    // that worked, and every surviving row names its database.
    assert_eq!(outcome.db_results.len(), 2);
    for row in &outcome.db_results {
        assert_eq!(row.get(SOURCE_DATABASE_KEY).unwrap(), "crm");
    }
    assert!(outcome.all_db_results.get("billing").unwrap().is_empty());
    assert!(outcome.execution_error.is_none());
    assert!(!outcome.final_response.is_empty());
}

#[tokio::test]
async fn test_harmful_candidate_is_refined_then_apologizes_when_exhausted() {
    let (_dir, path) = sqlite_db("CREATE TABLE t (c TEXT);");

    // Every candidate is harmful; the refine loop must exhaust its budget
    // and still produce an apologetic final answer.
    let sql = ScriptedBackend::new(
        "sql",
        &[
            "DROP TABLE t",
            "DELETE FROM t",
            "DROP TABLE t",
            "DELETE FROM t",
            "DROP TABLE t",
            "DELETE FROM t",
            "DROP TABLE t",
        ],
    );
    let response = EchoBackend::new();
    let deps = test_deps(
        sql_router(sql, response),
        vec![sqlite_handle("default", &path)],
        None,
    );

    let outcome = run_agent_request(RequestEnvelope::new("clean the table"), deps)
        .await
        .unwrap();

    assert!(outcome.retry_count <= 5);
    assert!(!outcome.final_response.is_empty());
    assert!(outcome.final_response.contains("sorry"));
}
