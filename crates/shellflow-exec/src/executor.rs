//! Command executor — runs one node's resolved command, captures output
//! incrementally, and enforces the per-command timeout.
//!
//! Output streams into the registry record from the moment of spawn, so
//! nothing is lost if the command is later backgrounded. The timeout is
//! wall-clock from spawn and checked at each liveness poll; when the check
//! and the exit land on the same poll, backgrounding wins, so a caller is
//! never blocked past the boundary.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use shellflow_core::config::ExecOptions;
use shellflow_core::error::{FlowError, Result};
use shellflow_core::types::{ExecutionResult, NodeState};

use crate::registry::{ProcessRecord, ProcessRegistry};
use crate::supervisor;

/// Liveness and timeout-boundary sampling interval.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Immediate results carry at most this much of each stream.
const MAX_EXCERPT: usize = 30_000;

#[derive(Clone)]
pub struct CommandExecutor {
    registry: Arc<ProcessRegistry>,
}

impl CommandExecutor {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }

    /// Run a graph node's resolved command. The registry record asks for
    /// the node id; the result always reports the node id even when the
    /// registry had to disambiguate.
    pub async fn run_node(
        &self,
        node_id: &str,
        command: &str,
        execution_id: Option<&str>,
        options: &ExecOptions,
    ) -> Result<ExecutionResult> {
        self.execute(Some(node_id), command, execution_id.map(str::to_string), options)
            .await
    }

    /// Run a bare command outside any graph, under a synthetic registry id.
    pub async fn run_command(
        &self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult> {
        self.execute(None, command, None, options).await
    }

    async fn execute(
        &self,
        node_id: Option<&str>,
        command: &str,
        execution_id: Option<String>,
        options: &ExecOptions,
    ) -> Result<ExecutionResult> {
        let shell = options.resolved_shell();
        let mut cmd = Command::new(shell.program());
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &options.env {
            cmd.env(k, v);
        }

        debug!(command, shell = %shell, "Spawning command");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            FlowError::execution(
                node_id.unwrap_or("cmd"),
                format!("spawn failed for '{}': {e}", shell.program()),
            )
        })?;
        let pid = child.id().unwrap_or_default();

        let record = self
            .registry
            .register(
                node_id,
                pid,
                command,
                options.cwd.clone(),
                options.env.clone(),
                execution_id,
            )
            .await;

        // Capture tasks own the pipes; they keep draining into the record
        // buffer after a backgrounding hand-off.
        let out_task = child
            .stdout
            .take()
            .map(|s| tokio::spawn(capture_lines(s, record.clone())));
        let err_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(capture_lines(s, record.clone())));

        let deadline = Duration::from_secs(options.timeout.max(0) as u64);
        let status = loop {
            if options.backgrounding_enabled() && started.elapsed() >= deadline {
                let node_label = node_id.unwrap_or(&record.id).to_string();
                return Ok(supervisor::detach(child, record, &node_label, started.elapsed()).await);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                    return Err(FlowError::execution(
                        record.id.as_str(),
                        format!("wait failed: {e}"),
                    ));
                }
            }
        };

        // Streams hit EOF once the child exits; join to collect the tails.
        let stdout_lines = match out_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr_lines = match err_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        record.record_exit(status).await;

        let state = if status.success() {
            NodeState::Succeeded
        } else {
            NodeState::Failed
        };
        debug!(
            id = %record.id,
            code = status.code().unwrap_or(-1),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );

        Ok(ExecutionResult {
            node_id: node_id.unwrap_or(&record.id).to_string(),
            exit_code: status.code(),
            duration_ms: started.elapsed().as_millis() as u64,
            stdout: if options.quiet {
                String::new()
            } else {
                excerpt(stdout_lines)
            },
            stderr: excerpt(stderr_lines),
            state,
            background_id: None,
        })
    }
}

/// Drain a stream line by line into the record buffer, keeping a local
/// copy for the immediate result.
async fn capture_lines<R>(stream: R, record: Arc<ProcessRecord>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        record.append_line(line.clone()).await;
        collected.push(line);
    }
    collected
}

fn excerpt(lines: Vec<String>) -> String {
    let mut content = lines.join("\n");
    if content.len() > MAX_EXCERPT {
        let mut cut = MAX_EXCERPT;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str("\n... (output truncated)");
    }
    content
}
