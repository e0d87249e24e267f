use thiserror::Error;

/// Errors surfaced by recipe loading and workflow execution.
///
/// Step-local errors are filtered through the step's failure policy before
/// they ever reach a caller; only aborts (or exhausted retry/refinement)
/// escalate to a run-level failure.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to parse recipe: {0}")]
    RecipeParse(String),

    #[error("missing required inputs: {}", .names.join(", "))]
    MissingInputs { names: Vec<String> },

    #[error("invalid value '{value}' for input '{input}' (choices: {})", .choices.join(", "))]
    InvalidChoice {
        input: String,
        value: String,
        choices: Vec<String>,
    },

    #[error("unknown tool '{tool}'. Available: {}", .available.join(", "))]
    UnknownTool { tool: String, available: Vec<String> },

    #[error("tool '{tool}' failed: {source}")]
    Tool { tool: String, source: anyhow::Error },

    #[error("validation gate failed: {failures:?}")]
    ValidationFailed { failures: Vec<String> },

    #[error("validation failed and no refinement defined for step {step}")]
    NoRefinement { step: String },

    #[error("refinement config for {step} has no steps")]
    EmptyRefinement { step: String },

    #[error("refinement for step {step} exhausted {iterations} iterations without passing validation")]
    RefinementExhausted { step: String, iterations: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] kiln_core::store::StoreError),
}
