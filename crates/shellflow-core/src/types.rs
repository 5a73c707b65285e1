use serde::{Deserialize, Serialize};

/// Lifecycle state of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Backgrounded,
    Skipped,
}

impl NodeState {
    /// Whether the scheduler is done with a node in this state.
    /// Backgrounded counts: the command keeps running under the registry,
    /// but the scheduler has already returned its result.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::Backgrounded | NodeState::Skipped
        )
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Succeeded => "succeeded",
            NodeState::Failed => "failed",
            NodeState::Backgrounded => "backgrounded",
            NodeState::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one node's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Which node this outcome belongs to.
    pub node_id: String,
    /// Exit code. None while backgrounded, skipped, or killed by signal.
    pub exit_code: Option<i32>,
    /// Wall-clock time from spawn to this result.
    pub duration_ms: u64,
    /// Captured stdout excerpt. Empty under `quiet`.
    pub stdout: String,
    /// Captured stderr excerpt.
    pub stderr: String,
    /// Terminal state of the node.
    pub state: NodeState,
    /// Registry id for backgrounded nodes, for follow-up `logs`/`kill`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_id: Option<String>,
}

impl ExecutionResult {
    /// Result for a node that was never dispatched.
    pub fn skipped(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            state: NodeState::Skipped,
            background_id: None,
        }
    }

    /// Result for a node that failed before its command could run.
    pub fn dispatch_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: message.into(),
            state: NodeState::Failed,
            background_id: None,
        }
    }

    /// Succeeded or Backgrounded both count toward overall graph success.
    pub fn counts_as_success(&self) -> bool {
        matches!(self.state, NodeState::Succeeded | NodeState::Backgrounded)
    }
}

/// Aggregate outcome of a graph execution.
///
/// Results are listed in node insertion order regardless of actual finish
/// order, so reports are deterministic across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphReport {
    /// Identifier linking registry records back to this execution.
    pub execution_id: String,
    /// Per-node outcomes in node insertion order.
    pub results: Vec<ExecutionResult>,
    /// Wall-clock time for the whole graph.
    pub duration_ms: u64,
    /// True iff every node reached Succeeded or Backgrounded.
    pub succeeded: bool,
}

impl GraphReport {
    pub fn new(execution_id: impl Into<String>, results: Vec<ExecutionResult>, duration_ms: u64) -> Self {
        let succeeded = results.iter().all(|r| r.counts_as_success());
        Self {
            execution_id: execution_id.into(),
            results,
            duration_ms,
            succeeded,
        }
    }
}
