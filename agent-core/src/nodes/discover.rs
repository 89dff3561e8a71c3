//! Registry discovery node.

use std::sync::Arc;

use crate::engine::AgentDeps;
use crate::state::AgentState;

/// Refresh the discovered-services list from the registry.
///
/// Discovery failure is never fatal: the run continues with whatever list
/// was already in the state (normally empty), and the analyzer simply plans
/// no tool calls.
pub async fn discover_services_node(
    mut state: AgentState,
    deps: Arc<AgentDeps>,
) -> Result<AgentState, String> {
    // The container's client wins; a registry URL carried in the state
    // (e.g. from the CLI) works without one.
    let registry = match (&deps.registry, &state.registry_url) {
        (Some(registry), _) => registry.clone(),
        (None, Some(url)) => crate::registry::RegistryClient::new(url.clone()),
        (None, None) => {
            println!("[Discover] No registry configured; skipping discovery");
            return Ok(state);
        }
    };

    match registry.discover(None).await {
        Ok(services) => {
            println!(
                "[Discover] Registry lists {} live service(s): {}",
                services.len(),
                services
                    .iter()
                    .map(|s| s.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            state.discovered_services = services;
        }
        Err(e) => {
            println!("[Discover] Discovery failed (continuing without services): {}", e);
        }
    }
    Ok(state)
}
