//! Script execution tool.
//!
//! Runs arbitrary user scripts (shell, Python, executables) as workflow
//! steps. Scripts run with the same permissions as the engine process, so
//! recipes must come from trusted sources.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use super::{opt_str, require_str};
use crate::context::WorkflowContext;
use crate::registry::{ToolHandler, ToolRegistry};
use kiln_core::ids;

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ScriptRunner;

impl ToolHandler for ScriptRunner {
    fn execute(
        &self,
        action: &str,
        inputs: &Value,
        ctx: &WorkflowContext,
        _registry: &ToolRegistry,
    ) -> Result<Value> {
        if action != "run" {
            bail!("unknown script action: {action}");
        }

        let script_path = Path::new(require_str(inputs, "script")?);
        if !script_path.exists() {
            bail!("script not found: {}", script_path.display());
        }

        let args = parse_args(inputs.get("args"))?;
        let timeout_secs = inputs
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let working_dir = opt_str(inputs, "working_dir");

        let mut command = interpreter_for(script_path);
        command.args(&args);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        // Outputs go to files in the run's scratch space; piping into memory
        // can deadlock once a pipe buffer fills.
        let capture_id = ids::new_id();
        let stdout_path = ctx.temp_dir.join(format!("script-{capture_id}.out"));
        let stderr_path = ctx.temp_dir.join(format!("script-{capture_id}.err"));
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(fs::File::create(&stdout_path)?))
            .stderr(Stdio::from(fs::File::create(&stderr_path)?));

        tracing::info!(
            "running script: {}",
            script_path.file_name().unwrap_or_default().to_string_lossy()
        );

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning {}", script_path.display()))?;

        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill()?;
                child.wait()?;
                bail!(
                    "script {} timed out after {timeout_secs}s",
                    script_path.display()
                );
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();
        let return_code = status.code().unwrap_or(1);
        if return_code != 0 {
            tracing::warn!("script stderr: {stderr}");
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "return_code": return_code,
            "success": return_code == 0,
        }))
    }
}

/// Pick an interpreter from the script extension.
fn interpreter_for(script_path: &Path) -> Command {
    let ext = script_path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    match ext.as_deref() {
        Some("py") => {
            let mut command = Command::new("python3");
            command.arg(script_path);
            command
        }
        Some("sh") | Some("bash") => {
            let mut command = Command::new("bash");
            command.arg(script_path);
            command
        }
        Some("ps1") => {
            let mut command = Command::new("powershell.exe");
            command.arg("-File").arg(script_path);
            command
        }
        _ => Command::new(script_path),
    }
}

/// Accept args as a sequence or a single shell-style string.
fn parse_args(args: Option<&Value>) -> Result<Vec<String>> {
    match args {
        None => Ok(Vec::new()),
        Some(Value::String(s)) => {
            shell_words::split(s).with_context(|| format!("bad args string '{s}'"))
        }
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        Some(other) => bail!("args must be a string or a sequence, got: {other}"),
    }
}
