use futures::future::BoxFuture;

use crate::error::Result;

/// Tool resolver — turns a delegated tool invocation into a command line.
///
/// Tool items are opaque to the graph builder; they carry a name and an
/// input mapping and are resolved here at execution time, immediately
/// before the command is spawned.
pub trait ToolResolver: Send + Sync + 'static {
    /// Resolve `tool` with `input` into an executable command line.
    fn resolve(&self, tool: &str, input: &serde_json::Value) -> BoxFuture<'_, Result<String>>;
}
