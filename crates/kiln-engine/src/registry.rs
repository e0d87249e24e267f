//! Registry of tool adapters available to workflow steps.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::tools;

/// The contract every tool adapter implements.
///
/// Inputs arrive already resolved; outputs must be a JSON-serializable
/// mapping (paths as strings). Adapters impose their own timeouts — the
/// runner blocks on `execute` for as long as it takes. Handlers receive
/// the registry that dispatched them, so adapters that run nested steps
/// (like `batch`) reach every registered tool, not a private subset.
pub trait ToolHandler {
    fn execute(
        &self,
        action: &str,
        inputs: &Value,
        ctx: &WorkflowContext,
        registry: &ToolRegistry,
    ) -> anyhow::Result<Value>;

    /// Whether the adapter's backing service or binary is usable right now.
    fn ready(&self) -> bool {
        true
    }
}

struct FnHandler<F>(F);

impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&str, &Value, &WorkflowContext) -> anyhow::Result<Value>,
{
    fn execute(
        &self,
        action: &str,
        inputs: &Value,
        ctx: &WorkflowContext,
        _registry: &ToolRegistry,
    ) -> anyhow::Result<Value> {
        (self.0)(action, inputs, ctx)
    }
}

/// Name-keyed dispatch table of tool adapters.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn ToolHandler>>,
    load_errors: BTreeMap<String, String>,
}

impl ToolRegistry {
    /// An empty registry. Callers register their own adapters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in adapters installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        tools::register_builtins(&mut registry);
        registry
    }

    /// Install a handler under the given tool name.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) {
        self.tools.insert(name.into(), Box::new(handler));
    }

    /// Install a plain function or closure as a handler.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&str, &Value, &WorkflowContext) -> anyhow::Result<Value> + 'static,
    {
        self.register(name, FnHandler(handler));
    }

    /// Record an adapter that failed to initialize. The failure is kept for
    /// diagnostics without affecting the tools that did load.
    pub fn record_load_error(&mut self, name: impl Into<String>, error: impl Into<String>) {
        self.load_errors.insert(name.into(), error.into());
    }

    /// Execute a tool action.
    pub fn execute(
        &self,
        tool: &str,
        action: &str,
        inputs: &Value,
        ctx: &WorkflowContext,
    ) -> Result<Value, WorkflowError> {
        let Some(handler) = self.tools.get(tool) else {
            return Err(WorkflowError::UnknownTool {
                tool: tool.to_string(),
                available: self.available_tools(),
            });
        };
        handler
            .execute(action, inputs, ctx, self)
            .map_err(|source| WorkflowError::Tool {
                tool: tool.to_string(),
                source,
            })
    }

    /// Sorted names of the installed tools.
    pub fn available_tools(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Readiness of each installed tool.
    pub fn preflight_check(&self) -> BTreeMap<String, bool> {
        self.tools
            .iter()
            .map(|(name, handler)| (name.clone(), handler.ready()))
            .collect()
    }

    /// Adapters that failed to initialize, keyed by tool name.
    pub fn load_errors(&self) -> &BTreeMap<String, String> {
        &self.load_errors
    }
}
