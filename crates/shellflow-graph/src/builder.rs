//! Lowering from the step IR onto the canonical graph.
//!
//! Sequencing rules: adjacent top-level steps chain (each implicitly
//! depends on the previous one); members of a parallel block all depend on
//! whatever precedes the block and are all depended on by whatever follows
//! it; an explicit `after` list overrides implicit chaining for that node
//! only.

use tracing::debug;

use shellflow_core::error::Result;

use crate::ast::Step;
use crate::graph::{Graph, GraphNode, NodeAction};

pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
    next_node: usize,
    next_group: usize,
}

impl GraphBuilder {
    /// Lower `steps` into a validated graph.
    ///
    /// `parallel` is a top-level hint honored only when the steps carry no
    /// DAG structure of their own (no parallel blocks, no explicit
    /// `after`): such a flat list becomes one parallel group with no edges
    /// instead of a chain.
    pub fn build(steps: Vec<Step>, parallel: bool) -> Result<Graph> {
        let steps = if parallel && steps.len() > 1 && steps.iter().all(Step::is_plain) {
            vec![Step::Parallel(steps)]
        } else {
            steps
        };

        let mut builder = Self {
            nodes: Vec::new(),
            next_node: 0,
            next_group: 0,
        };
        let mut prev: Vec<String> = Vec::new();
        for step in steps {
            prev = builder.lower(step, &prev, None);
        }

        debug!(nodes = builder.nodes.len(), "Lowered steps to graph");
        Graph::new(builder.nodes)
    }

    /// Lower one step. Returns the ids that following steps chain after.
    fn lower(&mut self, step: Step, prev: &[String], group: Option<&str>) -> Vec<String> {
        match step {
            Step::Command(run) => {
                vec![self.push(None, NodeAction::Command(run), None, prev, group)]
            }
            Step::Tool { tool, input } => {
                vec![self.push(None, NodeAction::Tool { name: tool, input }, None, prev, group)]
            }
            Step::Named { id, run, after } => {
                vec![self.push(id, NodeAction::Command(run), after, prev, group)]
            }
            Step::Parallel(items) => {
                // Nested parallel blocks collapse into the enclosing group.
                let gid = match group {
                    Some(g) => g.to_string(),
                    None => {
                        self.next_group += 1;
                        format!("g{}", self.next_group)
                    }
                };
                let mut ids = Vec::new();
                for item in items {
                    ids.extend(self.lower(item, prev, Some(&gid)));
                }
                ids
            }
        }
    }

    fn push(
        &mut self,
        id: Option<String>,
        action: NodeAction,
        after_override: Option<Vec<String>>,
        prev: &[String],
        group: Option<&str>,
    ) -> String {
        self.next_node += 1;
        // Auto ids are deterministic from position in creation order.
        let id = id.unwrap_or_else(|| format!("n{}", self.next_node));
        let after = after_override.unwrap_or_else(|| prev.to_vec());
        self.nodes.push(GraphNode {
            id: id.clone(),
            action,
            after,
            group: group.map(str::to_string),
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dsl, structured};
    use serde_json::json;

    #[test]
    fn test_chain_by_default() {
        let g = GraphBuilder::build(dsl::parse("a; b; c").unwrap(), false).unwrap();
        assert_eq!(g.len(), 3);
        assert!(g.nodes()[0].after.is_empty());
        assert_eq!(g.nodes()[1].after, vec!["n1"]);
        assert_eq!(g.nodes()[2].after, vec!["n2"]);
    }

    #[test]
    fn test_parallel_block_edges() {
        // mkdir -> {cp, cp} -> zip: fan out after the mkdir, fan in at the zip.
        let g = GraphBuilder::build(
            structured::parse(&json!([
                "mkdir dist",
                {"parallel": ["cp a dist/", "cp b dist/"]},
                "zip -r out.zip dist/"
            ]))
            .unwrap(),
            false,
        )
        .unwrap();

        assert_eq!(g.len(), 4);
        let nodes = g.nodes();
        assert!(nodes[0].after.is_empty());
        assert_eq!(nodes[1].after, vec!["n1"]);
        assert_eq!(nodes[2].after, vec!["n1"]);
        assert_eq!(nodes[3].after, vec!["n2", "n3"]);
        assert_eq!(nodes[1].group, nodes[2].group);
        assert!(nodes[1].group.is_some());
        assert!(nodes[3].group.is_none());
    }

    #[test]
    fn test_explicit_after_overrides_chaining() {
        let g = GraphBuilder::build(
            structured::parse(&json!([
                "a",
                {"id": "b", "run": "b"},
                {"id": "c", "run": "c", "after": []}
            ]))
            .unwrap(),
            false,
        )
        .unwrap();
        // b chains after n1, but c's explicit empty list makes it a root.
        assert_eq!(g.get("b").unwrap().after, vec!["n1"]);
        assert!(g.get("c").unwrap().after.is_empty());
    }

    #[test]
    fn test_parallel_hint_on_flat_list() {
        let g = GraphBuilder::build(structured::parse(&json!(["a", "b", "c"])).unwrap(), true)
            .unwrap();
        assert_eq!(g.len(), 3);
        for node in g.nodes() {
            assert!(node.after.is_empty());
            assert_eq!(node.group.as_deref(), Some("g1"));
        }
    }

    #[test]
    fn test_parallel_hint_ignored_with_structure() {
        let g = GraphBuilder::build(
            structured::parse(&json!(["a", {"parallel": ["b", "c"]}])).unwrap(),
            true,
        )
        .unwrap();
        // The explicit block wins; the leading command still chains.
        assert!(g.nodes()[0].after.is_empty());
        assert_eq!(g.nodes()[1].after, vec!["n1"]);
    }

    #[test]
    fn test_chaining_resumes_after_block() {
        let g = GraphBuilder::build(dsl::parse("a; {b & c}; d; e").unwrap(), false).unwrap();
        assert_eq!(g.nodes()[3].after, vec!["n2", "n3"]);
        assert_eq!(g.nodes()[4].after, vec!["n4"]);
    }

    #[test]
    fn test_named_node_keeps_chain_for_successor() {
        let g = GraphBuilder::build(
            structured::parse(&json!([
                {"id": "root", "run": "a", "after": []},
                "b"
            ]))
            .unwrap(),
            false,
        )
        .unwrap();
        // The successor chains after the named node regardless of its override.
        assert_eq!(g.nodes()[1].after, vec!["root"]);
    }

    #[test]
    fn test_cycle_via_explicit_after() {
        let err = GraphBuilder::build(
            structured::parse(&json!([
                {"id": "a", "run": "a", "after": ["b"]},
                {"id": "b", "run": "b", "after": ["a"]}
            ]))
            .unwrap(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, shellflow_core::error::FlowError::Cycle { .. }));
    }

    #[test]
    fn test_tool_step_lowers_to_tool_action() {
        let g = GraphBuilder::build(
            structured::parse(&json!([{"tool": "fetch", "input": {"url": "http://x"}}])).unwrap(),
            false,
        )
        .unwrap();
        assert!(matches!(
            &g.nodes()[0].action,
            NodeAction::Tool { name, .. } if name == "fetch"
        ));
    }

    #[test]
    fn test_node_count_matches_input() {
        let g = GraphBuilder::build(
            dsl::parse("a; {b & c & d}; e; {f & g}").unwrap(),
            false,
        )
        .unwrap();
        assert_eq!(g.len(), 7);
    }
}
