//! Scheduler — walks a validated graph in dependency order.
//!
//! All currently ready nodes are dispatched concurrently in one sweep, so
//! members of a ready parallel group start together and effective
//! parallelism is governed purely by the graph. A node is ready when every
//! dependency has reached a satisfying terminal state: Succeeded or
//! Backgrounded always satisfy (a backgrounded dependency is "started, not
//! finished"); Failed satisfies only outside strict mode, where failure
//! instead skips the not-yet-started transitive dependents while running
//! siblings finish.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use shellflow_core::config::ExecOptions;
use shellflow_core::error::FlowError;
use shellflow_core::traits::ToolResolver;
use shellflow_core::types::{ExecutionResult, GraphReport, NodeState};
use shellflow_graph::{Graph, GraphNode, NodeAction};
use uuid::Uuid;

use crate::executor::CommandExecutor;
use crate::registry::ProcessRegistry;

pub struct Scheduler {
    registry: Arc<ProcessRegistry>,
    resolver: Option<Arc<dyn ToolResolver>>,
}

impl Scheduler {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self {
            registry,
            resolver: None,
        }
    }

    /// Attach the resolver used for `{tool, input}` nodes.
    pub fn with_resolver(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Execute every node to a terminal state and report in node insertion
    /// order, independent of finish order.
    pub async fn run(&self, graph: &Graph, options: &ExecOptions) -> GraphReport {
        let execution_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(
            execution_id = %execution_id,
            nodes = graph.len(),
            strict = options.strict,
            "Executing graph"
        );

        let n = graph.len();
        let deps = graph.dependency_indices();
        let dependents = graph.dependent_indices();
        let mut states = vec![NodeState::Pending; n];
        let mut results: Vec<Option<ExecutionResult>> = vec![None; n];

        let options = Arc::new(options.clone());
        let executor = CommandExecutor::new(self.registry.clone());
        let mut running: JoinSet<(usize, ExecutionResult)> = JoinSet::new();

        loop {
            for i in 0..n {
                if states[i] != NodeState::Pending {
                    continue;
                }
                let ready = deps[i].iter().all(|&d| match states[d] {
                    NodeState::Succeeded | NodeState::Backgrounded => true,
                    NodeState::Failed => !options.strict,
                    _ => false,
                });
                if !ready {
                    continue;
                }

                states[i] = NodeState::Running;
                let node = graph.nodes()[i].clone();
                let executor = executor.clone();
                let options = options.clone();
                let resolver = self.resolver.clone();
                let execution_id = execution_id.clone();
                debug!(node = %node.id, "Dispatching node");
                running.spawn(async move {
                    let result =
                        run_node(&executor, &node, resolver, &execution_id, &options).await;
                    (i, result)
                });
            }

            if states.iter().all(NodeState::is_terminal) {
                break;
            }

            let Some(joined) = running.join_next().await else {
                // Nothing in flight yet nodes remain non-terminal. Cannot
                // happen on a validated graph; close out rather than spin.
                warn!("Scheduler stalled with non-terminal nodes");
                for i in 0..n {
                    if !states[i].is_terminal() {
                        states[i] = NodeState::Skipped;
                        results[i] = Some(ExecutionResult::skipped(&graph.nodes()[i].id));
                    }
                }
                break;
            };

            let (i, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Node task aborted");
                    continue;
                }
            };

            debug!(node = %result.node_id, state = %result.state, "Node finished");
            states[i] = result.state;
            if result.state == NodeState::Failed && options.strict {
                skip_dependents(graph, i, &dependents, &mut states, &mut results);
            }
            results[i] = Some(result);
        }

        let results = results
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.unwrap_or_else(|| ExecutionResult::skipped(&graph.nodes()[i].id)))
            .collect();
        let report = GraphReport::new(execution_id, results, started.elapsed().as_millis() as u64);
        info!(
            succeeded = report.succeeded,
            duration_ms = report.duration_ms,
            "Graph execution finished"
        );
        report
    }
}

/// Mark every not-yet-started node that transitively depends on `failed`
/// as Skipped. Running nodes are left to finish; nothing is signalled.
fn skip_dependents(
    graph: &Graph,
    failed: usize,
    dependents: &[Vec<usize>],
    states: &mut [NodeState],
    results: &mut [Option<ExecutionResult>],
) {
    let mut queue = vec![failed];
    while let Some(i) = queue.pop() {
        for &j in &dependents[i] {
            if states[j] == NodeState::Pending {
                states[j] = NodeState::Skipped;
                results[j] = Some(ExecutionResult::skipped(&graph.nodes()[j].id));
                info!(node = %graph.nodes()[j].id, "Skipping dependent of failed node");
                queue.push(j);
            }
        }
    }
}

async fn run_node(
    executor: &CommandExecutor,
    node: &GraphNode,
    resolver: Option<Arc<dyn ToolResolver>>,
    execution_id: &str,
    options: &ExecOptions,
) -> ExecutionResult {
    let command = match &node.action {
        NodeAction::Command(c) => Ok(c.clone()),
        NodeAction::Tool { name, input } => match resolver {
            Some(r) => r.resolve(name, input).await,
            None => Err(FlowError::execution(
                node.id.as_str(),
                format!("no tool resolver configured for tool '{name}'"),
            )),
        },
    };
    let command = match command {
        Ok(c) => c,
        Err(e) => {
            error!(node = %node.id, error = %e, "Tool resolution failed");
            return ExecutionResult::dispatch_failed(node.id.as_str(), e.to_string());
        }
    };

    match executor
        .run_node(&node.id, &command, Some(execution_id), options)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(node = %node.id, error = %e, "Node execution failed");
            ExecutionResult::dispatch_failed(node.id.as_str(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use shellflow_core::config::Shell;
    use shellflow_core::error::Result;

    fn sh_options() -> ExecOptions {
        ExecOptions {
            shell: Some(Shell::Sh),
            ..Default::default()
        }
    }

    fn scheduler() -> (Scheduler, Arc<ProcessRegistry>) {
        let registry = Arc::new(ProcessRegistry::new());
        (Scheduler::new(registry.clone()), registry)
    }

    fn compile(value: serde_json::Value) -> Graph {
        shellflow_graph::compile_value(&value, false).unwrap()
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("a.txt");
        let graph = compile(serde_json::json!([
            format!("echo one > {}", marker.display()),
            // Fails unless the first node completed beforehand.
            format!("cat {}", marker.display()),
        ]));
        let (scheduler, _) = scheduler();
        let report = scheduler.run(&graph, &sh_options()).await;
        assert!(report.succeeded);
        assert_eq!(report.results[1].stdout, "one");
    }

    #[tokio::test]
    async fn test_results_in_insertion_order() {
        let graph = compile(serde_json::json!([
            {"id": "slow", "run": "sleep 1; echo slow", "after": []},
            {"id": "fast", "run": "echo fast", "after": []}
        ]));
        let (scheduler, _) = scheduler();
        let report = scheduler.run(&graph, &sh_options()).await;
        // fast finishes first; the report still lists slow first.
        assert_eq!(report.results[0].node_id, "slow");
        assert_eq!(report.results[1].node_id, "fast");
    }

    #[tokio::test]
    async fn test_strict_skips_transitive_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let c_marker = dir.path().join("c.ran");
        let graph = compile(serde_json::json!([
            {"id": "a", "run": "exit 1", "after": []},
            {"id": "b", "run": "echo b", "after": ["a"]},
            {"id": "c", "run": format!("touch {}", c_marker.display()), "after": ["b"]},
            {"id": "d", "run": "echo d", "after": []}
        ]));
        let (scheduler, _) = scheduler();
        let options = ExecOptions {
            strict: true,
            ..sh_options()
        };
        let report = scheduler.run(&graph, &options).await;

        assert!(!report.succeeded);
        assert_eq!(report.results[0].state, NodeState::Failed);
        assert_eq!(report.results[1].state, NodeState::Skipped);
        assert_eq!(report.results[2].state, NodeState::Skipped);
        // Independent sibling still ran.
        assert_eq!(report.results[3].state, NodeState::Succeeded);
        // The skipped command was never spawned.
        assert!(!c_marker.exists());
    }

    #[tokio::test]
    async fn test_non_strict_failure_does_not_propagate() {
        let graph = compile(serde_json::json!([
            {"id": "a", "run": "exit 7"},
            {"id": "b", "run": "echo ran", "after": ["a"]}
        ]));
        let (scheduler, _) = scheduler();
        let report = scheduler.run(&graph, &sh_options()).await;

        assert!(!report.succeeded);
        assert_eq!(report.results[0].state, NodeState::Failed);
        assert_eq!(report.results[0].exit_code, Some(7));
        assert_eq!(report.results[1].state, NodeState::Succeeded);
        assert_eq!(report.results[1].stdout, "ran");
    }

    #[tokio::test]
    async fn test_parallel_nodes_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x");
        let y = dir.path().join("y");
        // Each side signals and then waits for the other; both succeed
        // only if they were genuinely running at the same time.
        let handshake = |mine: &std::path::Path, theirs: &std::path::Path| {
            format!(
                "touch {m}; n=0; while [ ! -e {t} ]; do sleep 0.05; n=$((n+1)); \
                 [ $n -gt 100 ] && exit 1; done",
                m = mine.display(),
                t = theirs.display()
            )
        };
        let graph = compile(serde_json::json!([
            {"parallel": [handshake(&x, &y), handshake(&y, &x)]}
        ]));
        let (scheduler, _) = scheduler();
        let report = scheduler.run(&graph, &sh_options()).await;
        assert!(report.succeeded, "parallel nodes never overlapped");
    }

    #[tokio::test]
    async fn test_backgrounded_dependency_satisfies_dependent() {
        let graph = compile(serde_json::json!([
            {"id": "server", "run": "sleep 30"},
            {"id": "probe", "run": "echo up", "after": ["server"]}
        ]));
        let (scheduler, registry) = scheduler();
        let options = ExecOptions {
            timeout: 1,
            ..sh_options()
        };
        let report = scheduler.run(&graph, &options).await;

        assert!(report.succeeded);
        assert_eq!(report.results[0].state, NodeState::Backgrounded);
        let id = report.results[0].background_id.clone().unwrap();
        assert_eq!(report.results[1].state, NodeState::Succeeded);
        registry.kill(&id, None).await.unwrap();
    }

    struct EchoResolver;

    impl ToolResolver for EchoResolver {
        fn resolve(
            &self,
            tool: &str,
            input: &serde_json::Value,
        ) -> BoxFuture<'_, Result<String>> {
            let line = format!(
                "echo {} {}",
                tool,
                input.get("arg").and_then(|v| v.as_str()).unwrap_or("")
            );
            Box::pin(async move { Ok(line) })
        }
    }

    #[tokio::test]
    async fn test_tool_nodes_use_resolver() {
        let graph = compile(serde_json::json!([
            {"tool": "greet", "input": {"arg": "world"}}
        ]));
        let registry = Arc::new(ProcessRegistry::new());
        let scheduler =
            Scheduler::new(registry.clone()).with_resolver(Arc::new(EchoResolver));
        let report = scheduler.run(&graph, &sh_options()).await;
        assert!(report.succeeded);
        assert_eq!(report.results[0].stdout, "greet world");
    }

    #[tokio::test]
    async fn test_tool_node_without_resolver_fails() {
        let graph = compile(serde_json::json!([{"tool": "greet", "input": {}}]));
        let (scheduler, _) = scheduler();
        let report = scheduler.run(&graph, &sh_options()).await;
        assert!(!report.succeeded);
        assert_eq!(report.results[0].state, NodeState::Failed);
        assert!(report.results[0].stderr.contains("greet"));
    }

    #[tokio::test]
    async fn test_empty_graph_succeeds() {
        let graph = shellflow_graph::compile_text("").unwrap();
        let (scheduler, _) = scheduler();
        let report = scheduler.run(&graph, &sh_options()).await;
        assert!(report.succeeded);
        assert!(report.results.is_empty());
    }
}
