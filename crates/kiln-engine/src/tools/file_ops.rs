//! File operations tool.
//!
//! Provides copy, move, delete, mkdir, and list operations for workflow
//! steps.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use super::{opt_str, require_str};
use crate::context::WorkflowContext;
use crate::registry::{ToolHandler, ToolRegistry};

pub struct FileOps;

impl ToolHandler for FileOps {
    fn execute(
        &self,
        action: &str,
        inputs: &Value,
        _ctx: &WorkflowContext,
        _registry: &ToolRegistry,
    ) -> Result<Value> {
        match action {
            "copy" => {
                let src = Path::new(require_str(inputs, "source")?);
                let dst = Path::new(require_str(inputs, "destination")?);
                copy_with_parents(src, dst)?;
                Ok(json!({ "destination": dst.display().to_string() }))
            }
            "move" => {
                let src = Path::new(require_str(inputs, "source")?);
                let dst = Path::new(require_str(inputs, "destination")?);
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent)?;
                }
                move_path(src, dst)
                    .with_context(|| format!("moving {} to {}", src.display(), dst.display()))?;
                Ok(json!({ "destination": dst.display().to_string() }))
            }
            "delete" => {
                let path = Path::new(require_str(inputs, "path")?);
                if path.is_dir() {
                    fs::remove_dir_all(path)?;
                } else if path.exists() {
                    fs::remove_file(path)?;
                }
                Ok(json!({ "deleted": path.display().to_string() }))
            }
            "mkdir" => {
                let path = Path::new(require_str(inputs, "path")?);
                fs::create_dir_all(path)?;
                Ok(json!({ "created": path.display().to_string() }))
            }
            "copy_multiple" => {
                let copies = inputs
                    .get("copies")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut results = Vec::new();
                for spec in &copies {
                    let src = Path::new(require_str(spec, "source")?);
                    let dst = Path::new(require_str(spec, "destination")?);
                    copy_with_parents(src, dst)?;
                    results.push(json!({
                        "source": src.display().to_string(),
                        "destination": dst.display().to_string(),
                    }));
                }
                Ok(json!({ "copies": results }))
            }
            "list" => {
                let path = opt_str(inputs, "path").unwrap_or(".");
                let pattern = opt_str(inputs, "pattern").unwrap_or("*");
                let full_pattern = format!("{path}/{pattern}");
                let mut files = Vec::new();
                for entry in glob::glob(&full_pattern)
                    .with_context(|| format!("bad glob pattern '{full_pattern}'"))?
                {
                    files.push(entry?.display().to_string());
                }
                Ok(json!({ "count": files.len(), "files": files }))
            }
            other => bail!("unknown file_ops action: {other}"),
        }
    }
}

fn copy_with_parents(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst).with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Rename, falling back to copy-and-remove for files crossing filesystems.
pub(crate) fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) if src.is_file() => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}
