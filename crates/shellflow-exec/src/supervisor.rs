//! Backgrounding supervisor — converts a would-be-unbounded wait into an
//! immediate return.
//!
//! Invoked exactly when a managed process is still running at timeout
//! expiry. Ownership of the child moves into a detached task that keeps
//! the registry record current; the caller gets a Backgrounded result
//! carrying the registry id and never blocks again. The command's later
//! exit updates the record only; the returned result is final.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, info, warn};

use shellflow_core::types::{ExecutionResult, NodeState};

use crate::registry::ProcessRecord;

pub async fn detach(
    mut child: Child,
    record: Arc<ProcessRecord>,
    node_id: &str,
    elapsed: Duration,
) -> ExecutionResult {
    record.mark_detached().await;
    info!(
        id = %record.id,
        pid = record.pid,
        elapsed_secs = elapsed.as_secs(),
        "Command still running at timeout, backgrounding"
    );

    let waiter_record = record.clone();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                waiter_record.record_exit(status).await;
                let state = waiter_record.state().await;
                debug!(
                    id = %waiter_record.id,
                    state = %state,
                    "Backgrounded command finished"
                );
            }
            Err(e) => {
                warn!(id = %waiter_record.id, error = %e, "Failed waiting on backgrounded command");
                waiter_record.record_failure().await;
            }
        }
    });

    ExecutionResult {
        node_id: node_id.to_string(),
        exit_code: None,
        duration_ms: elapsed.as_millis() as u64,
        stdout: String::new(),
        stderr: String::new(),
        state: NodeState::Backgrounded,
        background_id: Some(record.id.clone()),
    }
}
