//! Built-in tool adapters.
//!
//! Only adapters with no external service dependency live here; clients for
//! model servers, image generators, and renderers plug in through the same
//! [`ToolHandler`](crate::registry::ToolHandler) contract from outside the
//! engine.

pub mod batch;
pub mod file_ops;
pub mod script;
pub mod validator;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::registry::ToolRegistry;

/// Install the built-in adapters into a registry.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register("batch", batch::Batch);
    registry.register("file_ops", file_ops::FileOps);
    registry.register("script", script::ScriptRunner);
    registry.register("validator", validator::Validator);
}

pub(crate) fn require_str<'a>(inputs: &'a Value, key: &str) -> Result<&'a str> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing required input '{key}'"))
}

pub(crate) fn opt_str<'a>(inputs: &'a Value, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}
