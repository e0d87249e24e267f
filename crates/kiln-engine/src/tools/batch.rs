//! Batch operations tool.
//!
//! Iterates over items and executes nested workflow steps for each,
//! enabling foreach-style loops inside a single step. Iteration is
//! sequential; each item sees `{{item}}`, `{{item_index}}`, and the
//! outputs of the steps already run for that item.

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::context::WorkflowContext;
use crate::registry::{ToolHandler, ToolRegistry};
use crate::resolver;

/// The step shape accepted inside `workflow_steps`.
#[derive(Debug, Deserialize)]
struct BatchStep {
    #[serde(default)]
    id: Option<String>,
    tool: String,
    action: String,
    #[serde(default)]
    inputs: Map<String, Value>,
}

pub struct Batch;

impl ToolHandler for Batch {
    fn execute(
        &self,
        action: &str,
        inputs: &Value,
        ctx: &WorkflowContext,
        registry: &ToolRegistry,
    ) -> Result<Value> {
        if action != "foreach" {
            bail!("unknown batch action: {action}");
        }

        let items = parse_items(inputs.get("items"));
        let steps: Vec<BatchStep> = inputs
            .get("workflow_steps")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| anyhow!("bad workflow_steps: {e}"))?
            .unwrap_or_default();
        if steps.is_empty() {
            bail!("batch.foreach requires workflow_steps");
        }

        // Nested steps dispatch through the same registry that dispatched
        // this batch, so externally registered tools stay reachable.
        let mut results = Vec::new();
        tracing::info!("processing {} items in batch", items.len());

        for (item_index, item) in items.iter().enumerate() {
            let item_text = resolver::display_value(item);
            tracing::info!("batch item {}/{}: {item_text}", item_index + 1, items.len());

            let mut item_outputs = Map::new();

            for step in &steps {
                let step_id = step
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("batch_step_{item_index}"));

                let mut resolved = Map::new();
                for (key, value) in &step.inputs {
                    let value = match value {
                        Value::String(s) => {
                            let mut s = s.replace("{{item}}", &item_text);
                            s = s.replace("{{item_index}}", &item_index.to_string());
                            s = substitute_prior_outputs(&s, &item_outputs);
                            resolver::resolve(&Value::String(s), ctx)
                        }
                        other => other.clone(),
                    };
                    resolved.insert(key.clone(), value);
                }

                let outputs =
                    registry.execute(&step.tool, &step.action, &Value::Object(resolved), ctx)?;
                item_outputs.insert(step_id, outputs);
            }

            results.push(json!({
                "item": item,
                "index": item_index,
                "outputs": item_outputs,
            }));
        }

        Ok(json!({
            "results": results,
            "count": results.len(),
            "items_processed": items,
        }))
    }
}

/// Items arrive as a comma-separated string or a sequence.
fn parse_items(items: Option<&Value>) -> Vec<Value> {
    match items {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Replace `{{<step_id>.outputs.<key>}}` references with outputs already
/// produced for the current item.
fn substitute_prior_outputs(text: &str, item_outputs: &Map<String, Value>) -> String {
    let mut result = text.to_string();
    for (step_id, outputs) in item_outputs {
        let Value::Object(outputs) = outputs else {
            continue;
        };
        for (key, value) in outputs {
            let placeholder = format!("{{{{{step_id}.outputs.{key}}}}}");
            if result.contains(&placeholder) {
                result = result.replace(&placeholder, &resolver::display_value(value));
            }
        }
    }
    result
}
