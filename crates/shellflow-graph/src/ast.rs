use serde_json::Value;

/// One step of the intermediate representation.
///
/// Both front-ends parse into a list of steps; the builder lowers steps
/// onto the canonical graph. Keeping this layer separate means the text
/// grammar and the structured form cannot drift apart in meaning.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A literal command line.
    Command(String),
    /// Steps dispatched together, sharing no edges among themselves.
    Parallel(Vec<Step>),
    /// An explicitly named node. An explicit `after` list overrides
    /// implicit chaining for this node only.
    Named {
        id: Option<String>,
        run: String,
        after: Option<Vec<String>>,
    },
    /// A delegated tool invocation, opaque until execution time.
    Tool { tool: String, input: Value },
}

impl Step {
    /// A step that neither groups other steps nor overrides chaining.
    /// A list made only of these carries no DAG structure of its own.
    pub fn is_plain(&self) -> bool {
        match self {
            Step::Command(_) | Step::Tool { .. } => true,
            Step::Named { after, .. } => after.is_none(),
            Step::Parallel(_) => false,
        }
    }
}
