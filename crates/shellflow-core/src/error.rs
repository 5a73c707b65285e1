use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph construction errors
    #[error("Parse error at '{fragment}': {message}")]
    Parse { fragment: String, message: String },

    #[error("Node '{node}' lists unknown dependency '{id}'")]
    Reference { node: String, id: String },

    #[error("Dependency cycle: {path}")]
    Cycle { path: String },

    // Execution errors
    #[error("Execution failed for node '{node}': {message}")]
    Execution { node: String, message: String },

    // Registry errors
    #[error("No process registered with id '{0}'")]
    ProcessNotFound(String),

    #[error("Process '{0}' is not running")]
    ProcessNotRunning(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Shorthand for a parse error carrying the offending fragment.
    pub fn parse(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a per-node execution error.
    pub fn execution(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            node: node.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
