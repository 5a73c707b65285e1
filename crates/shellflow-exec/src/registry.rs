//! Process registry — the process-wide catalog of commands the engine has
//! started, foreground and backgrounded alike.
//!
//! Records are created when a command spawns and stay until an operator
//! removes them or the host process exits, so completed-job logs remain
//! inspectable. Mutation goes through a per-record mutex; the registry map
//! lock is only held for insert/lookup, so listings never observe a
//! half-written record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shellflow_core::error::{FlowError, Result};

/// SIGTERM, the default for `kill`.
pub const DEFAULT_SIGNAL: i32 = Signal::SIGTERM as i32;

/// How long `kill` waits for the exit to be observed before returning with
/// the signal delivered but the state still Running.
const KILL_CONFIRM_WAIT: Duration = Duration::from_secs(5);
const KILL_CONFIRM_POLL: Duration = Duration::from_millis(50);

/// State of a registered process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Exited(i32),
    Killed(i32),
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited(code) => write!(f, "exited({code})"),
            ProcessState::Killed(sig) => write!(f, "killed({sig})"),
        }
    }
}

/// Mutable portion of a record, behind the per-record lock.
#[derive(Debug)]
struct RecordInner {
    state: ProcessState,
    /// Append-only combined stdout/stderr lines.
    output: Vec<String>,
    /// Signal most recently delivered through `kill`, used when the exit
    /// status does not name one.
    killed_with: Option<i32>,
    /// Whether the supervisor detached this command from its caller.
    detached: bool,
}

/// One tracked process. Shared via `Arc`; all mutation goes through the
/// per-record mutex so concurrent readers see complete records.
pub struct ProcessRecord {
    pub id: String,
    pub pid: u32,
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Extra environment the command was spawned with.
    pub env: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    /// Graph execution that owns this record; None for bare commands.
    pub execution_id: Option<String>,
    inner: Mutex<RecordInner>,
}

impl ProcessRecord {
    pub async fn state(&self) -> ProcessState {
        self.inner.lock().await.state
    }

    pub async fn append_line(&self, line: String) {
        self.inner.lock().await.output.push(line);
    }

    pub async fn mark_detached(&self) {
        self.inner.lock().await.detached = true;
    }

    /// Last `n` lines of the output buffer; shorter buffers return fewer.
    pub async fn tail(&self, n: usize) -> Vec<String> {
        let inner = self.inner.lock().await;
        let skip = inner.output.len().saturating_sub(n);
        inner.output[skip..].to_vec()
    }

    /// Record the observed exit status. Decodes signal deaths into Killed,
    /// falling back to the signal `kill` delivered when the status does
    /// not carry one. Idempotent once terminal.
    pub async fn record_exit(&self, status: ExitStatus) {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_running() {
            return;
        }
        inner.state = match status.code() {
            Some(code) => ProcessState::Exited(code),
            None => {
                #[cfg(unix)]
                let sig = std::os::unix::process::ExitStatusExt::signal(&status);
                #[cfg(not(unix))]
                let sig: Option<i32> = None;
                ProcessState::Killed(sig.or(inner.killed_with).unwrap_or(DEFAULT_SIGNAL))
            }
        };
    }

    /// Terminal state for a process whose exit could not be observed.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            inner.state = ProcessState::Exited(-1);
        }
    }

    pub async fn snapshot(&self) -> ProcessSnapshot {
        let inner = self.inner.lock().await;
        ProcessSnapshot {
            id: self.id.clone(),
            pid: self.pid,
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            started_at: self.started_at,
            execution_id: self.execution_id.clone(),
            state: inner.state,
            detached: inner.detached,
            output_lines: inner.output.len(),
        }
    }
}

/// Point-in-time view of a record, safe to hand out of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub id: String,
    pub pid: u32,
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub execution_id: Option<String>,
    pub state: ProcessState,
    pub detached: bool,
    pub output_lines: usize,
}

/// Process-wide catalog of started commands. One instance per host
/// process, shared by the executor, the supervisor, and the operator
/// inspection surface.
pub struct ProcessRegistry {
    records: Mutex<HashMap<String, Arc<ProcessRecord>>>,
    next_synthetic: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_synthetic: AtomicU64::new(1),
        }
    }

    /// Create and insert a record under a unique id.
    ///
    /// Graph nodes ask for their node id and get a `-2`, `-3`, … suffix
    /// when a previous run already took it; bare commands get synthetic
    /// `cmd-N` ids.
    pub async fn register(
        &self,
        id_hint: Option<&str>,
        pid: u32,
        command: &str,
        cwd: Option<PathBuf>,
        env: HashMap<String, String>,
        execution_id: Option<String>,
    ) -> Arc<ProcessRecord> {
        let mut records = self.records.lock().await;
        let id = match id_hint {
            Some(want) if !records.contains_key(want) => want.to_string(),
            Some(want) => {
                let mut k = 2;
                loop {
                    let candidate = format!("{want}-{k}");
                    if !records.contains_key(&candidate) {
                        break candidate;
                    }
                    k += 1;
                }
            }
            None => loop {
                let n = self.next_synthetic.fetch_add(1, Ordering::SeqCst);
                let candidate = format!("cmd-{n}");
                if !records.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let record = Arc::new(ProcessRecord {
            id: id.clone(),
            pid,
            command: command.to_string(),
            cwd,
            env,
            started_at: Utc::now(),
            execution_id,
            inner: Mutex::new(RecordInner {
                state: ProcessState::Running,
                output: Vec::new(),
                killed_with: None,
                detached: false,
            }),
        });
        records.insert(id.clone(), record.clone());
        debug!(id = %id, pid, command, "Process registered");
        record
    }

    /// Snapshot of every record, sorted by start time.
    pub async fn list(&self) -> Vec<ProcessSnapshot> {
        let records = self.records.lock().await;
        let mut snapshots = Vec::with_capacity(records.len());
        for record in records.values() {
            snapshots.push(record.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    pub async fn get(&self, id: &str) -> Result<Arc<ProcessRecord>> {
        let records = self.records.lock().await;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| FlowError::ProcessNotFound(id.to_string()))
    }

    /// Last `n` lines of a record's output buffer.
    pub async fn logs(&self, id: &str, n: usize) -> Result<Vec<String>> {
        let record = self.get(id).await?;
        Ok(record.tail(n).await)
    }

    /// Deliver `signal` (default SIGTERM) to a running record's process.
    ///
    /// Returns the state observed after delivery: Killed once the exit is
    /// confirmed, or Running if the process has not exited within the
    /// confirmation window (the state updates when it does).
    pub async fn kill(&self, id: &str, signal: Option<i32>) -> Result<ProcessState> {
        let record = self.get(id).await?;
        let sig = signal.unwrap_or(DEFAULT_SIGNAL);

        {
            let mut inner = record.inner.lock().await;
            if !inner.state.is_running() {
                return Err(FlowError::ProcessNotRunning(id.to_string()));
            }
            inner.killed_with = Some(sig);
        }

        let signal = Signal::try_from(sig)
            .map_err(|_| FlowError::Config(format!("Unknown signal {sig}")))?;
        match nix::sys::signal::kill(Pid::from_raw(record.pid as i32), signal) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {
                // Stale record: the pid is already gone.
                record.record_failure().await;
                return Err(FlowError::ProcessNotRunning(id.to_string()));
            }
            Err(e) => {
                return Err(FlowError::execution(id, format!("kill failed: {e}")));
            }
        }
        info!(id, signal = sig, "Signal delivered");

        // The waiter owning the child observes the exit and records it;
        // give it a bounded window so callers see the transition.
        let deadline = tokio::time::Instant::now() + KILL_CONFIRM_WAIT;
        loop {
            let state = record.state().await;
            if !state.is_running() {
                return Ok(state);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(id, "Process did not exit within the confirmation window");
                return Ok(ProcessState::Running);
            }
            tokio::time::sleep(KILL_CONFIRM_POLL).await;
        }
    }

    /// Explicit operator removal. Running records must be killed first.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get(id)
            .ok_or_else(|| FlowError::ProcessNotFound(id.to_string()))?;
        if record.state().await.is_running() {
            return Err(FlowError::Config(format!(
                "Process '{id}' is still running; kill it first"
            )));
        }
        records.remove(id);
        Ok(())
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a signal given as a number, a name, or a name without the SIG
/// prefix ("15", "SIGTERM", "term").
pub fn parse_signal(s: &str) -> Result<i32> {
    let s = s.trim();
    if let Ok(n) = s.parse::<i32>() {
        return Ok(n);
    }
    let name = s.to_uppercase();
    let name = if name.starts_with("SIG") {
        name
    } else {
        format!("SIG{name}")
    };
    Signal::from_str(&name)
        .map(|sig| sig as i32)
        .map_err(|_| FlowError::Config(format!("Unknown signal '{s}'")))
}
