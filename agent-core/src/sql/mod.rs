//! SQL Safety & Rewriting
//!
//! Every SQL-touching node goes through these three stages, in order:
//! - `extract`: pull a bare SQL statement out of possibly-verbose LLM output
//! - `sanitize`: normalize escapes, strip comments and statement stacks,
//!   rewrite qualified identifiers down to what a single connection accepts
//! - `safety`: the keyword/pattern screen that rejects harmful candidates
//!
//! `tables` parses table references, aliases and qualified columns and checks
//! them against the collected schema dump.

pub mod extract;
pub mod safety;
pub mod sanitize;
pub mod tables;

pub use extract::extract_sql_statement;
pub use safety::screen_sql;
pub use sanitize::sanitize_sql;
pub use tables::{extract_table_aliases, extract_table_references, validate_against_schema};
