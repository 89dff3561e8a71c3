//! SQL extraction from LLM output.
//!
//! Models wrap their SQL in many ways: a JSON object with a `sql_query` key,
//! a fenced ```sql block, bespoke delimiter tags, or free text around the
//! statement. Recognition runs in that order; reasoning blocks
//! (`###ponder###…###/ponder###`, `<thinking>…</thinking>`) are discarded
//! wholesale before the whole-input fallback.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref JSON_SQL_KEY: Regex =
        Regex::new(r#""sql_query"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
    static ref FENCED_SQL: Regex =
        Regex::new(r"(?s)```(?:sql)?[ \t]*\n(.*?)```").unwrap();
    static ref TAGGED_SQL: Regex = Regex::new(
        r"(?is)<(sql_generated|sql_query|sql_code)>(.*?)</(?:sql_generated|sql_query|sql_code)>"
    )
    .unwrap();
    static ref PONDER_BLOCK: Regex =
        Regex::new(r"(?s)###ponder###.*?###/ponder###").unwrap();
    static ref THINKING_BLOCK: Regex =
        Regex::new(r"(?s)<thinking>.*?</thinking>").unwrap();
}

/// Extract a bare SQL statement from possibly-verbose LLM output.
pub fn extract_sql_statement(raw: &str) -> String {
    // 1. JSON object with a sql_query key. The captured value is re-parsed
    //    as a JSON string so escapes inside it are decoded correctly.
    if let Some(caps) = JSON_SQL_KEY.captures(raw) {
        let quoted = format!("\"{}\"", &caps[1]);
        if let Ok(decoded) = serde_json::from_str::<String>(&quoted) {
            return finish(&decoded);
        }
    }

    // 2. Fenced code block, labeled `sql` or bare.
    if let Some(caps) = FENCED_SQL.captures(raw) {
        return finish(&caps[1]);
    }

    // 3. Custom delimiter tags.
    if let Some(caps) = TAGGED_SQL.captures(raw) {
        return finish(&caps[2]);
    }

    // 4. Drop reasoning blocks wholesale, then 5. treat the rest as SQL.
    let without_ponder = PONDER_BLOCK.replace_all(raw, "");
    let without_thinking = THINKING_BLOCK.replace_all(&without_ponder, "");
    finish(&without_thinking)
}

/// Trim whitespace and reduce any trailing semicolon stack to a single one.
fn finish(sql: &str) -> String {
    let trimmed = sql.trim();
    let mut bare = trimmed;
    loop {
        let next = bare.trim_end_matches(';').trim_end();
        if next == bare {
            break;
        }
        bare = next;
    }
    if bare.len() < trimmed.len() {
        format!("{};", bare)
    } else {
        bare.to_string()
    }
}
