//! Schema fetch node.

use std::sync::Arc;

use crate::engine::AgentDeps;
use crate::protocol::SchemaDump;
use crate::state::AgentState;

/// Retrieve the schema of every configured database and build the combined
/// dump plus the table-to-database routing map.
///
/// A database that fails to report its schema is logged and skipped; partial
/// success is fine. With databases disabled the maps stay empty.
pub async fn get_schema_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    if state.disable_databases {
        println!("[GetSchema] Databases disabled; skipping schema fetch");
        state.schema_dump = SchemaDump::new();
        state.table_to_db_mapping.clear();
        return Ok(state);
    }

    let databases = deps.databases.list_databases();
    let mut combined = SchemaDump::new();
    let mut mapping = std::collections::HashMap::new();

    for db_name in &databases {
        match deps.databases.get_schema_dump(db_name).await {
            Ok(dump) => {
                println!(
                    "[GetSchema] '{}' reported {} table(s)",
                    db_name,
                    dump.len()
                );
                for (table_name, table_schema) in dump {
                    mapping.insert(table_name.clone(), db_name.clone());
                    combined.insert(table_name, table_schema);
                }
            }
            Err(e) => {
                println!("[GetSchema] '{}' schema fetch failed: {}", db_name, e);
            }
        }
    }

    println!(
        "[GetSchema] Combined schema holds {} table(s) across {} database(s)",
        combined.len(),
        databases.len()
    );
    state.schema_dump = combined;
    state.table_to_db_mapping = mapping;
    Ok(state)
}

/// Render a schema dump for an LLM prompt.
pub fn format_schema_dump(schema: &SchemaDump) -> String {
    let mut tables: Vec<_> = schema.iter().collect();
    tables.sort_by(|a, b| a.0.cmp(b.0));

    let mut formatted = String::new();
    for (table_name, table_schema) in tables {
        match &table_schema.comment {
            Some(comment) => {
                formatted.push_str(&format!("\nTable: {} - {}\n", table_name, comment))
            }
            None => formatted.push_str(&format!("\nTable: {}\n", table_name)),
        }
        for column in &table_schema.columns {
            formatted.push_str(&format!(
                "  - {} ({}){}",
                column.name,
                column.column_type,
                if column.nullable { "" } else { " NOT NULL" }
            ));
            if let Some(comment) = &column.comment {
                formatted.push_str(&format!(" - {}", comment));
            }
            formatted.push('\n');
        }
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ColumnSchema, TableSchema};

    #[test]
    fn test_format_schema_dump() {
        let mut schema = SchemaDump::new();
        schema.insert(
            "contacts".to_string(),
            TableSchema {
                columns: vec![
                    ColumnSchema {
                        name: "id".to_string(),
                        column_type: "INTEGER".to_string(),
                        nullable: false,
                        comment: None,
                    },
                    ColumnSchema {
                        name: "name".to_string(),
                        column_type: "TEXT".to_string(),
                        nullable: true,
                        comment: Some("display name".to_string()),
                    },
                ],
                comment: Some("customer directory".to_string()),
            },
        );

        let formatted = format_schema_dump(&schema);
        assert!(formatted.contains("Table: contacts - customer directory"));
        assert!(formatted.contains("id (INTEGER) NOT NULL"));
        assert!(formatted.contains("name (TEXT) - display name"));
    }
}
