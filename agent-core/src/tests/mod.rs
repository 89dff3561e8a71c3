//! End-to-end tests for the orchestration engine.
//!
//! Every scenario runs the real compiled graph with scripted completion
//! backends, embedded SQLite databases, and real HTTP workers bound to
//! ephemeral ports. Nothing is mocked below the seams the production code
//! itself uses.

pub mod boundaries;
pub mod sql_path;
pub mod support;
