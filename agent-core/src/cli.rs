//! Command-line argument parsing.

use clap::Parser;

/// CLI arguments for the agent binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "agent",
    about = "Agentic query orchestrator: answer natural-language requests over SQL, RAG, search and MCP services"
)]
pub struct CliArgs {
    /// Natural-language request to process; without it the agent runs an
    /// interactive loop on stdin.
    #[arg(long, value_name = "TEXT")]
    pub request: Option<String>,
    /// Logical database to query (default: all configured databases)
    #[arg(long, value_name = "NAME")]
    pub database: Option<String>,
    /// URL of the MCP registry server
    #[arg(long, value_name = "URL", env = "MCP_REGISTRY_URL")]
    pub registry_url: Option<String>,
}
