//! Agent binary.
//!
//! One-shot mode with `--request`, interactive stdin loop without it. Any
//! completed run (apologetic answers included) exits 0; unhandled runtime
//! failures exit non-zero.

use std::io::{BufRead, Write};
use std::sync::Arc;

use clap::Parser;

use agent_core::cli::CliArgs;
use agent_core::{run_agent_request_on, AgentDeps, RequestEnvelope, Settings};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if args.registry_url.is_some() {
        settings.registry_url = args.registry_url.clone();
    }

    let deps = match AgentDeps::from_settings(settings) {
        Ok(deps) => Arc::new(deps),
        Err(e) => {
            eprintln!("Startup error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(request) = args.request {
        run_one(request, args.database.clone(), deps).await;
        return;
    }

    // Interactive mode.
    println!("Agent ready. Enter your requests (type 'quit' to exit):");
    let databases = deps.databases.list_databases();
    if databases.is_empty() {
        println!("No databases configured.");
    } else {
        println!("Available databases: {}", databases.join(", "));
    }

    let stdin = std::io::stdin();
    loop {
        print!("\nYour request: ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
        let request = line.trim().to_string();
        if matches!(request.to_ascii_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }
        if request.is_empty() {
            continue;
        }
        run_one_inner(request, args.database.clone(), deps.clone()).await;
    }
}

async fn run_one(request: String, database: Option<String>, deps: Arc<AgentDeps>) {
    if !run_one_inner(request, database, deps).await {
        std::process::exit(1);
    }
}

async fn run_one_inner(
    request: String,
    database: Option<String>,
    deps: Arc<AgentDeps>,
) -> bool {
    match run_agent_request_on(RequestEnvelope::new(request), database, deps).await {
        Ok(outcome) => {
            println!("\nFinal Response:");
            println!("{}", outcome.final_response);
            true
        }
        Err(e) => {
            eprintln!("Error processing request: {}", e);
            false
        }
    }
}
