//! Graph Builder — compiles command requests into a validated DAG.
//!
//! Two front-ends produce the same intermediate representation: the
//! Shellflow text grammar (`;` for sequence, `{a & b}` for parallel blocks)
//! and the structured-object form (strings, `{"parallel": [...]}` blocks,
//! `{"id", "run", "after"}` nodes, `{"tool", "input"}` invocations). The
//! builder lowers either onto a canonical `Graph`, which is validated
//! (unique ids, no dangling `after` references, acyclic) before anything
//! executes.

pub mod ast;
pub mod builder;
pub mod dsl;
pub mod graph;
pub mod structured;

pub use ast::Step;
pub use builder::GraphBuilder;
pub use graph::{Graph, GraphNode, NodeAction};

use shellflow_core::error::Result;

/// Compile Shellflow text into a validated graph.
pub fn compile_text(text: &str) -> Result<Graph> {
    GraphBuilder::build(dsl::parse(text)?, false)
}

/// Compile a structured request (string, array, or object form) into a
/// validated graph. With `parallel` set and a flat node list, all nodes
/// share one parallel group instead of chaining.
pub fn compile_value(value: &serde_json::Value, parallel: bool) -> Result<Graph> {
    GraphBuilder::build(structured::parse(value)?, parallel)
}
