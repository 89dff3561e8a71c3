//! Error taxonomy.
//!
//! Errors never leave the graph runtime as panics or `Err` values; they are
//! converted into tagged state slots or MCP result envelopes. The kinds here
//! are the tags routers and envelopes branch on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a failure, carried in state slots and call envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// LLM returned unparseable output, or no SQL could be extracted.
    Generation,
    /// The safety screen rejected the candidate.
    Validation,
    /// A downstream system (database, MCP worker, LLM) reported failure.
    Execution,
    /// A referenced table or column is not present.
    Schema,
    /// A retry or recursion cap was reached.
    Budget,
    /// A per-call or request deadline was exceeded.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorKind::Generation => "generation",
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Schema => "schema",
            ErrorKind::Budget => "budget",
            ErrorKind::Timeout => "timeout",
        };
        write!(f, "{}", tag)
    }
}

/// A failure message together with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaggedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaggedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
