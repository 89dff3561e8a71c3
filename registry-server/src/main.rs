//! Standalone MCP service registry binary.

use std::net::SocketAddr;

use clap::Parser;
use registry_server::{spawn, DEFAULT_HOST, DEFAULT_PORT};

/// CLI arguments for the registry server.
#[derive(Parser, Debug)]
#[command(name = "registry-server", about = "MCP service registry")]
struct CliArgs {
    /// Host address to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let addr: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Invalid listen address {}:{}: {}", args.host, args.port, e);
            std::process::exit(1);
        }
    };

    match spawn(addr).await {
        Ok((_bound, handle)) => {
            if let Err(e) = handle.await {
                eprintln!("Registry task failed: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
