use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use shellflow_core::error::{FlowError, Result};

/// What a node executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAction {
    /// A literal command line, run through the configured shell.
    Command(String),
    /// A named tool invocation, resolved at execution time.
    Tool { name: String, input: Value },
}

impl NodeAction {
    /// One-line description for listings and logs.
    pub fn describe(&self) -> String {
        match self {
            NodeAction::Command(c) => c.clone(),
            NodeAction::Tool { name, .. } => format!("tool:{name}"),
        }
    }
}

/// One executable unit of a graph. Created once by the builder and never
/// mutated afterwards; runtime state lives with the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub action: NodeAction,
    /// Node ids this node waits for.
    #[serde(default)]
    pub after: Vec<String>,
    /// Parallel group this node was lowered from, if any.
    #[serde(default)]
    pub group: Option<String>,
}

/// A validated, acyclic command graph.
///
/// Nodes keep insertion order, which fixes the order of reported results
/// independent of actual finish order.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
}

impl Graph {
    /// Validate and seal a node list: unique ids, no dangling `after`
    /// references, no cycles. Nothing executes before this passes.
    pub fn new(nodes: Vec<GraphNode>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(FlowError::parse(&node.id, "duplicate node id"));
            }
        }

        for node in &nodes {
            for dep in &node.after {
                if !index.contains_key(dep) {
                    return Err(FlowError::Reference {
                        node: node.id.clone(),
                        id: dep.clone(),
                    });
                }
            }
        }

        let graph = Self { nodes, index };
        if let Some(cycle) = graph.find_cycle() {
            return Err(FlowError::Cycle {
                path: cycle.join(" -> "),
            });
        }
        Ok(graph)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Dependency indices per node, in node order.
    pub fn dependency_indices(&self) -> Vec<Vec<usize>> {
        self.nodes
            .iter()
            .map(|n| {
                n.after
                    .iter()
                    .filter_map(|id| self.index_of(id))
                    .collect()
            })
            .collect()
    }

    /// Reverse adjacency: for each node, the indices that depend on it.
    pub fn dependent_indices(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (i, deps) in self.dependency_indices().iter().enumerate() {
            for &d in deps {
                dependents[d].push(i);
            }
        }
        dependents
    }

    /// DFS over `after` edges. Returns one offending cycle as an id path
    /// ending where it started, or None for an acyclic graph.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        fn visit(
            graph: &Graph,
            i: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            marks[i] = Mark::Grey;
            stack.push(i);
            for dep in &graph.nodes[i].after {
                let Some(j) = graph.index_of(dep) else { continue };
                match marks[j] {
                    Mark::Grey => {
                        let start = stack.iter().position(|&k| k == j).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|&k| graph.nodes[k].id.clone())
                            .collect();
                        path.push(graph.nodes[j].id.clone());
                        return Some(path);
                    }
                    Mark::White => {
                        if let Some(path) = visit(graph, j, marks, stack) {
                            return Some(path);
                        }
                    }
                    Mark::Black => {}
                }
            }
            stack.pop();
            marks[i] = Mark::Black;
            None
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        let mut stack = Vec::new();
        for i in 0..self.nodes.len() {
            if marks[i] == Mark::White {
                if let Some(path) = visit(self, i, &mut marks, &mut stack) {
                    return Some(path);
                }
            }
        }
        None
    }
}
