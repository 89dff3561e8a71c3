//! Graph runtime.
//!
//! A compiled graph is a set of named async nodes, unconditional edges, and
//! conditional edges whose router picks a label from the current state. The
//! walk is sequential and single-threaded per run; any concurrency happens
//! inside a node. Cycles are allowed and bounded by a recursion cap.
//!
//! Node failures never escape `invoke`: an `Err` from a node is recorded
//! into the state's execution slot (unless the node already set one) and the
//! walk continues with routing, so the terminal node can still produce an
//! answer.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::state::AgentState;

/// Label of the distinguished terminal marker.
pub const END: &str = "__end__";

/// Default recursion cap for a full walk.
pub const DEFAULT_RECURSION_LIMIT: usize = 50;

/// Dependency container handed to every node, generic so the runtime does
/// not know what the engine wires through it.
pub type NodeFuture = BoxFuture<'static, Result<AgentState, String>>;

/// A node: consumes the state, returns the updated state.
pub type NodeFn<D> = Arc<dyn Fn(AgentState, Arc<D>) -> NodeFuture + Send + Sync>;

/// A router: reads the state, returns an edge label.
pub type RouterFn = Arc<dyn Fn(&AgentState) -> &'static str + Send + Sync>;

enum Edge {
    Direct(String),
    Conditional {
        router: RouterFn,
        targets: HashMap<&'static str, String>,
    },
}

/// Builder for an agent graph.
pub struct GraphBuilder<D> {
    nodes: HashMap<String, NodeFn<D>>,
    edges: HashMap<String, Edge>,
    entry: Option<String>,
}

impl<D> Default for GraphBuilder<D> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
        }
    }
}

impl<D: Send + Sync + 'static> GraphBuilder<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node<F>(mut self, name: &str, node: F) -> Self
    where
        F: Fn(AgentState, Arc<D>) -> NodeFuture + Send + Sync + 'static,
    {
        self.nodes.insert(name.to_string(), Arc::new(node));
        self
    }

    /// Unconditional edge `source -> target`.
    pub fn add_edge(mut self, source: &str, target: &str) -> Self {
        self.edges
            .insert(source.to_string(), Edge::Direct(target.to_string()));
        self
    }

    /// Conditional edge: `router(state)` picks one of `targets` by label.
    pub fn add_conditional_edges<F>(
        mut self,
        source: &str,
        router: F,
        targets: &[(&'static str, &str)],
    ) -> Self
    where
        F: Fn(&AgentState) -> &'static str + Send + Sync + 'static,
    {
        self.edges.insert(
            source.to_string(),
            Edge::Conditional {
                router: Arc::new(router),
                targets: targets
                    .iter()
                    .map(|(label, target)| (*label, target.to_string()))
                    .collect(),
            },
        );
        self
    }

    pub fn set_entry_point(mut self, name: &str) -> Self {
        self.entry = Some(name.to_string());
        self
    }

    /// Compile the graph, checking that every edge points at a real node.
    pub fn build(self) -> Result<CompiledGraph<D>, String> {
        let entry = self.entry.ok_or("Graph has no entry point")?;
        if !self.nodes.contains_key(&entry) {
            return Err(format!("Entry node '{}' is not defined", entry));
        }
        let check = |target: &str| -> Result<(), String> {
            if target != END && !self.nodes.contains_key(target) {
                return Err(format!("Edge points at undefined node '{}'", target));
            }
            Ok(())
        };
        for edge in self.edges.values() {
            match edge {
                Edge::Direct(target) => check(target)?,
                Edge::Conditional { targets, .. } => {
                    for target in targets.values() {
                        check(target)?;
                    }
                }
            }
        }
        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
        })
    }
}

/// A compiled, walkable graph.
pub struct CompiledGraph<D> {
    nodes: HashMap<String, NodeFn<D>>,
    edges: HashMap<String, Edge>,
    entry: String,
}

impl<D: Send + Sync + 'static> CompiledGraph<D> {
    /// Walk the graph from the entry node until the terminal marker or the
    /// recursion cap. Returns the final state; never an error.
    pub async fn invoke(
        &self,
        initial_state: AgentState,
        recursion_limit: usize,
        deps: Arc<D>,
    ) -> AgentState {
        let mut state = initial_state;
        let mut current = self.entry.clone();
        let mut hops = 0usize;

        loop {
            if hops >= recursion_limit {
                println!(
                    "[Graph] Recursion limit of {} hops reached at node '{}'",
                    recursion_limit, current
                );
                if state.final_response.is_empty() {
                    state.final_response = format!(
                        "I had to stop early: the processing graph hit its {}-step limit \
                         before a complete answer was ready. The partial evidence gathered \
                         so far was not conclusive.",
                        recursion_limit
                    );
                }
                return state;
            }
            hops += 1;

            let node = self
                .nodes
                .get(&current)
                .expect("compiled graphs only route to defined nodes");

            println!("[Graph] Step {}: {}", hops, current);
            match node(state.clone(), deps.clone()).await {
                Ok(next) => state = next,
                Err(e) => {
                    // The node blew up instead of recording a slot itself.
                    println!("[Graph] Node '{}' failed: {}", current, e);
                    if !state.has_error() {
                        state.execution_error =
                            Some(format!("Node '{}' failed: {}", current, e));
                    }
                }
            }

            current = match self.edges.get(&current) {
                Some(Edge::Direct(target)) => target.clone(),
                Some(Edge::Conditional { router, targets }) => {
                    let label = router(&state);
                    match targets.get(label) {
                        Some(target) => target.clone(),
                        None => {
                            println!(
                                "[Graph] Router at '{}' returned unmapped label '{}', stopping",
                                current, label
                            );
                            return state;
                        }
                    }
                }
                // No outgoing edge behaves like the terminal marker.
                None => return state,
            };

            if current == END {
                return state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::FutureExt;

    struct NoDeps;

    fn counting_node(tag: &'static str) -> impl Fn(AgentState, Arc<NoDeps>) -> NodeFuture {
        move |mut state, _| {
            async move {
                state.final_response.push_str(tag);
                Ok(state)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_linear_walk() {
        let graph = GraphBuilder::new()
            .add_node("a", counting_node("a"))
            .add_node("b", counting_node("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a")
            .build()
            .unwrap();

        let result = graph
            .invoke(AgentState::new("q"), DEFAULT_RECURSION_LIMIT, Arc::new(NoDeps))
            .await;
        assert_eq!(result.final_response, "ab");
    }

    #[tokio::test]
    async fn test_conditional_routing() {
        let graph = GraphBuilder::new()
            .add_node("start", |mut state: AgentState, _| {
                async move {
                    state.retry_count += 1;
                    Ok(state)
                }
                .boxed()
            })
            .add_node("done_path", counting_node("D"))
            .add_conditional_edges(
                "start",
                |state: &AgentState| {
                    if state.retry_count < 3 {
                        "again"
                    } else {
                        "done"
                    }
                },
                &[("again", "start"), ("done", "done_path")],
            )
            .add_edge("done_path", END)
            .set_entry_point("start")
            .build()
            .unwrap();

        let result = graph
            .invoke(AgentState::new("q"), DEFAULT_RECURSION_LIMIT, Arc::new(NoDeps))
            .await;
        assert_eq!(result.retry_count, 3);
        assert_eq!(result.final_response, "D");
    }

    #[tokio::test]
    async fn test_recursion_cap_produces_terminal_state() {
        let graph = GraphBuilder::new()
            .add_node("spin", |state: AgentState, _| async move { Ok(state) }.boxed())
            .add_edge("spin", "spin")
            .set_entry_point("spin")
            .build()
            .unwrap();

        let result = graph.invoke(AgentState::new("q"), 7, Arc::new(NoDeps)).await;
        assert!(result.final_response.contains("7-step limit"));
    }

    #[tokio::test]
    async fn test_node_error_is_caught_and_recorded() {
        let graph = GraphBuilder::new()
            .add_node("boom", |_, _| async move { Err("kaput".to_string()) }.boxed())
            .add_node("after", counting_node("A"))
            .add_edge("boom", "after")
            .add_edge("after", END)
            .set_entry_point("boom")
            .build()
            .unwrap();

        let result = graph
            .invoke(AgentState::new("q"), DEFAULT_RECURSION_LIMIT, Arc::new(NoDeps))
            .await;
        assert!(result.execution_error.as_ref().unwrap().contains("kaput"));
        assert_eq!(result.final_response, "A");
    }

    #[test]
    fn test_build_rejects_dangling_edges() {
        let result = GraphBuilder::<NoDeps>::new()
            .add_node("a", counting_node("a"))
            .add_edge("a", "ghost")
            .set_entry_point("a")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_requires_entry_point() {
        let result = GraphBuilder::<NoDeps>::new()
            .add_node("a", counting_node("a"))
            .build();
        assert!(result.is_err());
    }
}
