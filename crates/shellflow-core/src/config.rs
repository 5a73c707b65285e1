use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FlowError;

/// Global default for the auto-background timeout, in seconds.
/// Zero or negative disables backgrounding entirely.
pub const AUTO_BACKGROUND_TIMEOUT_ENV: &str = "HANZO_AUTO_BACKGROUND_TIMEOUT";

/// Default interpreter when a request does not name one.
pub const DEFAULT_SHELL_ENV: &str = "HANZO_DEFAULT_SHELL";

const DEFAULT_TIMEOUT_SECS: i64 = 45;

/// Shell used to interpret command lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    #[default]
    Zsh,
    Bash,
    Sh,
    Dash,
}

impl Shell {
    /// Program name passed to the spawner.
    pub fn program(&self) -> &'static str {
        match self {
            Shell::Zsh => "zsh",
            Shell::Bash => "bash",
            Shell::Sh => "sh",
            Shell::Dash => "dash",
        }
    }
}

impl FromStr for Shell {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zsh" => Ok(Shell::Zsh),
            "bash" => Ok(Shell::Bash),
            "sh" => Ok(Shell::Sh),
            "dash" => Ok(Shell::Dash),
            other => Err(FlowError::Config(format!("Unknown shell '{}'", other))),
        }
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program())
    }
}

/// Options governing one command or graph execution.
///
/// Field defaults match what an empty request resolves to, so this can be
/// deserialized straight from a structured request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Treat a flat node list as one parallel group. Ignored when the input
    /// carries its own DAG structure.
    #[serde(default)]
    pub parallel: bool,
    /// Skip not-yet-started transitive dependents of a failed node.
    #[serde(default)]
    pub strict: bool,
    /// Seconds a command may run before it is auto-backgrounded.
    /// Zero or negative means never background: callers block to completion.
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    /// Suppress stdout in immediate results. The registry buffer still fills.
    #[serde(default)]
    pub quiet: bool,
    /// Working directory for spawned commands.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment for spawned commands.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Interpreter for command lines. `HANZO_DEFAULT_SHELL` applies when unset.
    #[serde(default)]
    pub shell: Option<Shell>,
}

fn default_timeout() -> i64 {
    timeout_from_env().unwrap_or(DEFAULT_TIMEOUT_SECS)
}

fn timeout_from_env() -> Option<i64> {
    let raw = std::env::var(AUTO_BACKGROUND_TIMEOUT_ENV).ok()?;
    match raw.trim().parse::<i64>() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!(value = %raw, "Ignoring unparsable {}", AUTO_BACKGROUND_TIMEOUT_ENV);
            None
        }
    }
}

fn shell_from_env() -> Option<Shell> {
    let raw = std::env::var(DEFAULT_SHELL_ENV).ok()?;
    match raw.parse() {
        Ok(shell) => Some(shell),
        Err(_) => {
            warn!(value = %raw, "Ignoring unknown {}", DEFAULT_SHELL_ENV);
            None
        }
    }
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            strict: false,
            timeout: default_timeout(),
            quiet: false,
            cwd: None,
            env: HashMap::new(),
            shell: None,
        }
    }
}

impl ExecOptions {
    /// Effective interpreter: explicit choice, then `HANZO_DEFAULT_SHELL`,
    /// then zsh.
    pub fn resolved_shell(&self) -> Shell {
        self.shell.or_else(shell_from_env).unwrap_or_default()
    }

    /// Whether commands outliving the timeout are handed to the registry.
    pub fn backgrounding_enabled(&self) -> bool {
        self.timeout > 0
    }
}
