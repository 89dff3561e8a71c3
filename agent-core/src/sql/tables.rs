//! Table reference parsing and schema validation.
//!
//! Parses table references out of FROM and JOIN clauses (quoted or
//! qualified), binds aliases, and verifies that every referenced table and
//! every qualified column exists in the collected schema dump. Lookup is
//! case-insensitive and multi-database aware: the caller decides which
//! database's slice of the dump applies.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::protocol::SchemaDump;

lazy_static! {
    // FROM/JOIN followed by a (possibly qualified, possibly quoted) name.
    static ref TABLE_REF: Regex = Regex::new(
        r#"(?i)\b(?:FROM|JOIN)\s+((?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*)(?:\.(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*))*)"#
    )
    .unwrap();
    // Same, but also capturing a trailing alias (with optional AS).
    static ref TABLE_ALIAS: Regex = Regex::new(
        r#"(?i)\b(?:FROM|JOIN)\s+((?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*)(?:\.(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*))*)\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*)\b"#
    )
    .unwrap();
}

/// Words that can follow a table name but are never aliases.
const NON_ALIAS_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "ON", "USING", "JOIN", "LEFT",
    "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "NATURAL", "UNION", "EXCEPT", "INTERSECT",
    "AS", "SET",
];

fn last_segment(qualified: &str) -> String {
    qualified
        .rsplit('.')
        .next()
        .unwrap_or(qualified)
        .trim_matches('"')
        .to_string()
}

/// Table names referenced in FROM/JOIN position, deduplicated in order.
/// Qualifiers and quotes are stripped; subqueries are skipped.
pub fn extract_table_references(sql: &str) -> Vec<String> {
    let mut tables = Vec::new();
    for caps in TABLE_REF.captures_iter(sql) {
        let name = last_segment(&caps[1]);
        if name.is_empty() {
            continue;
        }
        if NON_ALIAS_KEYWORDS.contains(&name.to_ascii_uppercase().as_str())
            || name.eq_ignore_ascii_case("select")
        {
            continue;
        }
        if !tables.iter().any(|t: &String| t.eq_ignore_ascii_case(&name)) {
            tables.push(name);
        }
    }
    tables
}

/// Alias bindings: lowercase table name -> aliases bound to it.
pub fn extract_table_aliases(sql: &str) -> HashMap<String, Vec<String>> {
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
    for caps in TABLE_ALIAS.captures_iter(sql) {
        let table = last_segment(&caps[1]).to_ascii_lowercase();
        let alias = caps[2].to_string();
        if NON_ALIAS_KEYWORDS.contains(&alias.to_ascii_uppercase().as_str()) {
            continue;
        }
        let entry = aliases.entry(table).or_default();
        if !entry.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
            entry.push(alias);
        }
    }
    aliases
}

/// Columns referenced through a given qualifier (`qualifier.column`).
fn columns_for_qualifier(sql: &str, qualifier: &str) -> Vec<String> {
    let pattern = format!(
        r#"(?i)(?:^|[^A-Za-z0-9_."]){}"?\.("?[A-Za-z_][A-Za-z0-9_]*"?)"#,
        regex::escape(qualifier)
    );
    let regex = match Regex::new(&pattern) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    regex
        .captures_iter(sql)
        .map(|caps| caps[1].trim_matches('"').to_string())
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("select"))
        .collect()
}

/// Verify that every table referenced by `sql` exists in `schema` and that
/// every qualified column resolves against the bound table.
///
/// When a table-to-database mapping is supplied, only the tables mapped to
/// `db_name` are held against this database's schema; the others belong to
/// sibling databases and are checked there.
pub fn validate_against_schema(
    sql: &str,
    db_name: &str,
    schema: &SchemaDump,
    table_to_db_mapping: Option<&HashMap<String, String>>,
) -> Result<(), String> {
    let referenced = extract_table_references(sql);
    let aliases = extract_table_aliases(sql);

    let relevant: Vec<&String> = match table_to_db_mapping {
        Some(mapping) => referenced
            .iter()
            .filter(|table| {
                mapping
                    .iter()
                    .find(|(t, _)| t.eq_ignore_ascii_case(table))
                    .map(|(_, db)| db.eq_ignore_ascii_case(db_name))
                    .unwrap_or(true)
            })
            .collect(),
        None => referenced.iter().collect(),
    };

    for table in relevant {
        let (actual_name, table_schema) = match schema
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
        {
            Some((name, ts)) => (name.clone(), ts),
            None => {
                return Err(format!(
                    "Table '{}' does not exist in database '{}'",
                    table, db_name
                ));
            }
        };

        // Qualifiers that resolve to this table: its own name plus aliases.
        let mut qualifiers = vec![actual_name.clone(), table.clone()];
        if let Some(bound) = aliases.get(&actual_name.to_ascii_lowercase()) {
            qualifiers.extend(bound.iter().cloned());
        }
        qualifiers.sort();
        qualifiers.dedup();

        for qualifier in qualifiers {
            for column in columns_for_qualifier(sql, &qualifier) {
                if !table_schema.has_column(&column) {
                    return Err(format!(
                        "Column '{}' does not exist in table '{}' in database '{}'",
                        column, actual_name, db_name
                    ));
                }
            }
        }
    }

    Ok(())
}
