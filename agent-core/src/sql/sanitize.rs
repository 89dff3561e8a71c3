//! SQL sanitization.
//!
//! Rewrites an extracted candidate into a statement a single database
//! connection will accept:
//! - LLM escape artifacts (`\'`, `\n`, `\t`, `\r`, doubled backslashes) are
//!   normalized to their literal characters
//! - comments and stacked statements are stripped
//! - qualified identifiers are cut down: a three-part `db.schema.table`
//!   loses its database segment, a two-part `a.b` keeps `a` only when it is
//!   a known schema name
//!
//! Escape normalization runs to a fixed point and the identifier rewrite is
//! a single non-rescanning pass, so stacked escaping collapses
//! deterministically and a rewritten name is not rewritten again within the
//! same call.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Schema names that may legitimately prefix a table. Anything else in the
/// first position of a two-part name is treated as a database prefix and
/// dropped.
pub const KNOWN_SCHEMAS: &[&str] = &[
    "public",
    "analytics",
    "information_schema",
    "pg_catalog",
    "pg_toast",
    "main",
    "dbo",
];

lazy_static! {
    static ref ESCAPED_QUOTE: Regex = Regex::new(r"\\'").unwrap();
    static ref BACKSLASH_RUN: Regex = Regex::new(r"\\{2,}").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"--[^\n]*").unwrap();
    static ref HASH_COMMENT: Regex = Regex::new(r"#[^\n]*").unwrap();
    // KEYWORD first.second[.third] (quoted or unquoted parts, alias left
    // alone); one pattern for both arities so a rewritten name is never
    // re-matched within the same pass.
    static ref QUALIFIED_NAME: Regex = Regex::new(
        r#"(?i)\b(FROM|JOIN)\s+("[^".]+"|[A-Za-z_][A-Za-z0-9_]*)\.("[^".]+"|[A-Za-z_][A-Za-z0-9_]*)(\.("[^".]+"|[A-Za-z_][A-Za-z0-9_]*))?"#
    )
    .unwrap();
}

fn strip_quotes(part: &str) -> &str {
    part.trim_matches('"')
}

fn is_known_schema(part: &str) -> bool {
    let clean = strip_quotes(part).to_ascii_lowercase();
    KNOWN_SCHEMAS.contains(&clean.as_str())
}

/// Normalize LLM escape artifacts. Runs to a fixed point so stacked
/// escaping collapses deterministically.
fn normalize_escapes(sql: &str) -> String {
    let mut current = sql.to_string();
    loop {
        let mut next = ESCAPED_QUOTE.replace_all(&current, "'").into_owned();
        next = next.replace("\\n", "\n").replace("\\t", "\t").replace("\\r", "\r");
        next = BACKSLASH_RUN.replace_all(&next, r"\").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Strip comments, then keep only the first statement (dropping its `;`).
fn strip_comments_and_terminators(sql: &str) -> String {
    let without_block = BLOCK_COMMENT.replace_all(sql, " ");
    let without_line = LINE_COMMENT.replace_all(&without_block, "");
    let without_hash = HASH_COMMENT.replace_all(&without_line, "");
    match without_hash.find(';') {
        Some(idx) => without_hash[..idx].trim().to_string(),
        None => without_hash.trim().to_string(),
    }
}

/// Rewrite qualified table names in FROM/JOIN position.
///
/// A three-part `db.schema.table` loses its database segment, whatever the
/// schema is. A two-part `a.b` keeps `a` only when it is a known schema;
/// otherwise `a` is treated as a database prefix and dropped. Column
/// qualifiers are untouched because only FROM/JOIN positions are rewritten;
/// aliases after the name are left in place.
fn rewrite_qualified_names(sql: &str) -> String {
    QUALIFIED_NAME
        .replace_all(sql, |caps: &Captures| {
            let keyword = &caps[1];
            let first = &caps[2];
            let second = &caps[3];
            match caps.get(5) {
                // db.schema.table: drop the database segment.
                Some(third) => format!("{} {}.{}", keyword, second, third.as_str()),
                // first.table: keep a known schema, drop a database prefix.
                None => {
                    if is_known_schema(first) {
                        format!("{} {}.{}", keyword, first, second)
                    } else {
                        format!("{} {}", keyword, second)
                    }
                }
            }
        })
        .into_owned()
}

/// Sanitize an extracted SQL candidate.
pub fn sanitize_sql(sql: &str) -> String {
    let unescaped = normalize_escapes(sql);
    let stripped = strip_comments_and_terminators(&unescaped);
    rewrite_qualified_names(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escaped_quotes_become_literals() {
        assert_eq!(
            sanitize_sql(r"SELECT * FROM t WHERE c = \'x\'"),
            "SELECT * FROM t WHERE c = 'x'"
        );
    }

    #[test]
    fn test_escape_sequences_normalize() {
        assert_eq!(
            sanitize_sql("SELECT a\\nFROM t"),
            "SELECT a\nFROM t"
        );
        assert_eq!(sanitize_sql(r"SELECT '\\path'"), r"SELECT '\path'");
    }

    #[test]
    fn test_comments_are_stripped() {
        assert_eq!(
            sanitize_sql("SELECT a /* hidden */ FROM t"),
            "SELECT a   FROM t"
        );
        assert_eq!(sanitize_sql("SELECT a FROM t -- trailing"), "SELECT a FROM t");
        assert_eq!(sanitize_sql("SELECT a FROM t # note"), "SELECT a FROM t");
    }

    #[test]
    fn test_only_first_statement_survives() {
        assert_eq!(
            sanitize_sql("SELECT a FROM t; DROP TABLE t;"),
            "SELECT a FROM t"
        );
        assert_eq!(sanitize_sql("SELECT a FROM t;"), "SELECT a FROM t");
    }

    #[test]
    fn test_three_part_name_loses_database_prefix() {
        assert_eq!(
            sanitize_sql("SELECT * FROM contacts_db.public.contacts c"),
            "SELECT * FROM public.contacts c"
        );
        assert_eq!(
            sanitize_sql(r#"SELECT * FROM "mydb"."public"."users" u"#),
            r#"SELECT * FROM "public"."users" u"#
        );
    }

    #[test]
    fn test_three_part_name_keeps_schema_whatever_it_is() {
        assert_eq!(
            sanitize_sql("SELECT * FROM mydb.staging.users"),
            "SELECT * FROM staging.users"
        );
    }

    #[test]
    fn test_two_part_known_schema_is_kept() {
        assert_eq!(
            sanitize_sql("SELECT * FROM public.contacts"),
            "SELECT * FROM public.contacts"
        );
        assert_eq!(
            sanitize_sql(r#"SELECT * FROM "analytics"."events" e"#),
            r#"SELECT * FROM "analytics"."events" e"#
        );
    }

    #[test]
    fn test_two_part_database_prefix_is_dropped() {
        assert_eq!(
            sanitize_sql(r#"SELECT * FROM "default"."contacts""#),
            r#"SELECT * FROM "contacts""#
        );
        assert_eq!(
            sanitize_sql("SELECT * FROM contacts_db.contacts JOIN orders_db.orders ON 1=1"),
            "SELECT * FROM contacts JOIN orders ON 1=1"
        );
    }

    #[test]
    fn test_column_qualifiers_are_untouched() {
        let sql = "SELECT c.name, o.total FROM contacts c JOIN orders o ON c.id = o.contact_id";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            r"SELECT * FROM t WHERE c = \'x\'",
            "SELECT * FROM contacts_db.public.contacts c",
            "SELECT * FROM mydb.public.users",
            "SELECT a FROM t; DROP TABLE t;",
            "SELECT a /* x */ FROM t -- y",
            r"SELECT '\\\\server\\share'",
            "plain text, not even sql",
            "SELECT * FROM \"default\".\"contacts\"",
        ];
        for input in inputs {
            let once = sanitize_sql(input);
            let twice = sanitize_sql(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }
}
