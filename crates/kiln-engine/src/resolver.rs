//! Expression resolver for `{{…}}` placeholders.
//!
//! Supports dot-separated paths rooted at:
//! - `inputs.<name>` — resolved workflow inputs
//! - `config.<key>` — the recipe's config block (nested keys allowed)
//! - `templates.<key>` — reusable recipe fragments
//! - `steps.<id>.outputs.<key>` — committed outputs of earlier steps
//! - `workflow.run_id` / `workflow.run_dir` / `workflow.name`
//! - `temp_dir` — the run's scratch directory
//! - `timestamp` — the instant of evaluation, ISO-8601
//!
//! Resolution is non-fatal: an expression that cannot be evaluated is
//! logged at warning level and left in place, so a later refinement pass
//! can still supply the missing data.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::context::WorkflowContext;

static NULL: Value = Value::Null;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder pattern is valid"))
}

#[derive(Debug, Error)]
enum ResolveError {
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("cannot look up '{key}' on a non-container value")]
    NotAContainer { key: String },
}

/// Recursively resolve `{{…}}` placeholders in a value.
///
/// Mappings and sequences are rebuilt with resolved members (keys are left
/// untouched); non-string scalars pass through unchanged.
pub fn resolve(value: &Value, ctx: &WorkflowContext) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve placeholders in a single string.
pub fn resolve_str(s: &str, ctx: &WorkflowContext) -> String {
    placeholder_pattern()
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let expr = caps[1].trim();
            match evaluate(expr, ctx) {
                Ok(value) => display_value(&value),
                Err(e) => {
                    warn!(expression = expr, "could not resolve: {e}");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Stringify a resolved value for substitution into the surrounding text.
///
/// Null renders as `None` and booleans as `True`/`False`, matching how the
/// tool adapters spell verdict fields in prompts and file names; structured
/// values render as their compact JSON dump.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Evaluate a dot-separated path expression against the context.
fn evaluate(expr: &str, ctx: &WorkflowContext) -> Result<Value, ResolveError> {
    let parts: Vec<&str> = expr.split('.').collect();

    match parts[0] {
        "inputs" => walk_map(&ctx.inputs, &parts[1..]),
        "config" => walk_map(&ctx.config, &parts[1..]),
        "templates" => {
            // One segment returns the whole map; a known key returns that
            // fragment; an unknown key falls back to the whole map.
            match parts.get(1).and_then(|key| ctx.templates.get(*key)) {
                Some(fragment) => Ok(fragment.clone()),
                None => Ok(Value::Object(ctx.templates.clone())),
            }
        }
        "steps" => {
            let step_id = parts
                .get(1)
                .ok_or_else(|| ResolveError::UnknownVariable(expr.to_string()))?;
            match ctx.steps_output.get(*step_id) {
                Some(entry) => walk(entry, &parts[2..]),
                // Output not committed yet: keep a recognizable pending
                // placeholder in the text.
                None => Ok(Value::String(format!("{{{{steps.{step_id}...}}}}"))),
            }
        }
        "workflow" => match parts.get(1) {
            Some(&"run_id") => Ok(Value::String(ctx.run_id.clone())),
            Some(&"run_dir") => Ok(Value::String(ctx.run_dir.display().to_string())),
            Some(&"name") => Ok(Value::String(ctx.workflow_name.clone())),
            _ => Err(ResolveError::UnknownVariable(expr.to_string())),
        },
        "temp_dir" => Ok(Value::String(ctx.temp_dir.display().to_string())),
        "timestamp" => Ok(Value::String(
            chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
        )),
        _ => Err(ResolveError::UnknownVariable(expr.to_string())),
    }
}

fn walk_map(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Result<Value, ResolveError> {
    let Some((first, rest)) = keys.split_first() else {
        return Ok(Value::Object(map.clone()));
    };
    walk(map.get(*first).unwrap_or(&NULL), rest)
}

/// Traverse nested maps. A missing key yields a null walker (which renders
/// as `None`); descending into a scalar is an evaluation failure.
fn walk(value: &Value, keys: &[&str]) -> Result<Value, ResolveError> {
    let mut current = value;
    for key in keys {
        current = match current {
            Value::Object(map) => map.get(*key).unwrap_or(&NULL),
            Value::Null => &NULL,
            _ => {
                return Err(ResolveError::NotAContainer {
                    key: (*key).to_string(),
                })
            }
        };
    }
    Ok(current.clone())
}
