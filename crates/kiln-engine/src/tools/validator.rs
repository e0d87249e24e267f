//! Validation tool — quality gates for workflow outputs.
//!
//! Checks produced files for existence, size bounds, extension, and
//! non-emptiness, returning the `{passed, failures}` verdict shape that
//! gate steps consume.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use super::{opt_str, require_str};
use crate::context::WorkflowContext;
use crate::registry::{ToolHandler, ToolRegistry};

pub struct Validator;

impl ToolHandler for Validator {
    fn execute(
        &self,
        action: &str,
        inputs: &Value,
        _ctx: &WorkflowContext,
        _registry: &ToolRegistry,
    ) -> Result<Value> {
        let checks = inputs.get("checks").cloned().unwrap_or_else(|| json!({}));

        match action {
            "check_file" => {
                let path = Path::new(require_str(inputs, "file")?);
                let mut failures = Vec::new();
                check_file(path, &checks, &mut failures);
                Ok(json!({
                    "passed": failures.is_empty(),
                    "failures": failures,
                    "file": path.display().to_string(),
                }))
            }
            "check_files" => {
                let dir = require_str(inputs, "dir")?;
                let pattern = opt_str(inputs, "pattern").unwrap_or("*");
                let full_pattern = format!("{dir}/{pattern}");

                let mut failures = Vec::new();
                let mut checked = 0usize;
                for entry in glob::glob(&full_pattern)
                    .with_context(|| format!("bad glob pattern '{full_pattern}'"))?
                {
                    let path = entry?;
                    checked += 1;
                    let mut file_failures = Vec::new();
                    check_file(&path, &checks, &mut file_failures);
                    for failure in file_failures {
                        failures.push(format!("{}: {failure}", path.display()));
                    }
                }

                if let Some(min_count) = checks.get("min_count").and_then(Value::as_u64) {
                    if (checked as u64) < min_count {
                        failures.push(format!("found {checked} files, expected {min_count}"));
                    }
                }

                Ok(json!({
                    "passed": failures.is_empty(),
                    "failures": failures,
                    "checked": checked,
                }))
            }
            other => bail!("unknown validator action: {other}"),
        }
    }
}

fn check_file(path: &Path, checks: &Value, failures: &mut Vec<String>) {
    let Ok(meta) = fs::metadata(path) else {
        failures.push(format!("file not found: {}", path.display()));
        return;
    };
    let size = meta.len();

    if let Some(min_size) = checks.get("min_size_bytes").and_then(Value::as_u64) {
        if size < min_size {
            failures.push(format!("size {size} < {min_size} bytes"));
        }
    }

    if let Some(max_size) = checks.get("max_size_bytes").and_then(Value::as_u64) {
        if size > max_size {
            failures.push(format!("size {size} > {max_size} bytes"));
        }
    }

    if checks.get("non_empty").and_then(Value::as_bool).unwrap_or(false) && size == 0 {
        failures.push("file is empty".to_string());
    }

    if let Some(expected) = checks.get("extension").and_then(Value::as_str) {
        let expected = expected.trim_start_matches('.');
        let actual = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !actual.eq_ignore_ascii_case(expected) {
            failures.push(format!("extension '{actual}' != '{expected}'"));
        }
    }
}
