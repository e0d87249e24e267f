//! Sequential workflow execution.
//!
//! The runner walks a recipe's steps in order. For each step it resolves
//! the declared inputs against the live context, dispatches the tool
//! through the registry, commits outputs, and applies the step's failure
//! policy. Validation gates promote a tool's `passed` output into a
//! verdict; a `refine` policy answers a failed verdict with a bounded
//! recovery loop. Every boundary is recorded in the run store when
//! persistence is enabled.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::cleanup;
use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::recipe::{
    parse_recipe_file, resolve_recipe_inputs, FailurePolicy, Recipe, Step, StepType,
};
use crate::registry::ToolRegistry;
use crate::resolver::{self, resolve};
use kiln_core::store::{RunStatus, RunStore};
use kiln_core::EngineConfig;

/// Terminal outcome of a workflow run, as consumed by front-ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub run_id: String,
    pub run_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Executes workflow recipes.
pub struct WorkflowRunner {
    config: EngineConfig,
    registry: ToolRegistry,
    auto_approve: bool,
}

impl WorkflowRunner {
    pub fn new(config: EngineConfig, registry: ToolRegistry, auto_approve: bool) -> Self {
        Self {
            config,
            registry,
            auto_approve,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a recipe from start to finish.
    ///
    /// Returns `Err` only for failures that precede any run state (recipe
    /// parse errors, unresolvable inputs, run-directory creation). Once a
    /// context exists, every outcome is reported through [`RunResult`].
    pub fn run(
        &self,
        recipe_path: &Path,
        provided_inputs: Map<String, Value>,
        project_id: Option<&str>,
    ) -> Result<RunResult, WorkflowError> {
        let recipe = parse_recipe_file(recipe_path)?;
        let inputs = resolve_recipe_inputs(&recipe, &provided_inputs)?;
        let mut ctx = WorkflowContext::new(&recipe, inputs, &self.config.run_dir)?;

        let mut store: Option<RunStore> = None;
        if self.config.persistence.enabled {
            let opened = RunStore::open(&self.config.persistence.db_path).and_then(|mut s| {
                let run_id = s.start_run(
                    &recipe_path.display().to_string(),
                    &Value::Object(ctx.inputs.clone()),
                    project_id,
                    Some(&ctx.run_dir.display().to_string()),
                )?;
                Ok((s, run_id))
            });
            match opened {
                Ok((s, run_id)) => {
                    // The store owns run-id allocation; the context adopts it.
                    ctx.run_id = run_id;
                    store = Some(s);
                }
                Err(e) => warn!("persistence not available ({e}), running without tracking"),
            }
        }

        info!("starting workflow: {}", recipe.name);
        info!("run id: {}", ctx.run_id);
        info!("run directory: {}", ctx.run_dir.display());

        match self.execute_steps(&recipe, &mut ctx, &mut store) {
            Ok(()) => {
                cleanup::run_cleanup(&recipe.cleanup.on_success, &ctx);
                if let Some(s) = store.as_mut() {
                    s.complete_run(
                        &ctx.run_id,
                        &Value::Object(ctx.steps_output.clone()),
                        RunStatus::Completed,
                    )?;
                }
                info!("workflow completed successfully");
                Ok(RunResult {
                    success: true,
                    run_id: ctx.run_id.clone(),
                    run_dir: ctx.run_dir.clone(),
                    outputs: Some(Value::Object(ctx.steps_output.clone())),
                    error: None,
                    errors: Vec::new(),
                })
            }
            Err(e) => {
                error!("workflow failed: {e}");
                ctx.errors.push(e.to_string());
                if let Some(s) = store.as_mut() {
                    if let Err(store_err) = s.fail_run(&ctx.run_id, &e.to_string()) {
                        warn!("could not record run failure: {store_err}");
                    }
                }
                cleanup::run_cleanup(&recipe.cleanup.on_failure, &ctx);
                Ok(RunResult {
                    success: false,
                    run_id: ctx.run_id.clone(),
                    run_dir: ctx.run_dir.clone(),
                    outputs: None,
                    error: Some(e.to_string()),
                    errors: ctx.errors.clone(),
                })
            }
        }
    }

    fn execute_steps(
        &self,
        recipe: &Recipe,
        ctx: &mut WorkflowContext,
        store: &mut Option<RunStore>,
    ) -> Result<(), WorkflowError> {
        for step in &recipe.steps {
            self.execute_step(step, recipe, ctx, store)?;
        }
        Ok(())
    }

    /// Execute one step, bracketed by its run-store record.
    fn execute_step<'a>(
        &self,
        step: &'a Step,
        recipe: &'a Recipe,
        ctx: &mut WorkflowContext,
        store: &mut Option<RunStore>,
    ) -> Result<(), WorkflowError> {
        ctx.current_step = Some(step.id.clone());
        info!(step = %step.id, "executing: {}", step.display_name());

        if let Some(s) = store.as_mut() {
            s.start_step(
                &ctx.run_id,
                &step.id,
                step.display_name(),
                &Value::Object(step.inputs.clone()),
            )?;
        }

        let result = self.execute_step_inner(step, recipe, ctx, store);

        if let Some(s) = store.as_mut() {
            match &result {
                Ok(()) => {
                    let outputs = ctx
                        .step_output(&step.id)
                        .cloned()
                        .unwrap_or_else(|| json!({}));
                    s.complete_step(&ctx.run_id, &step.id, &outputs)?;
                }
                Err(e) => s.fail_step(&ctx.run_id, &step.id, &e.to_string())?,
            }
        }

        result
    }

    fn execute_step_inner<'a>(
        &self,
        step: &'a Step,
        recipe: &'a Recipe,
        ctx: &mut WorkflowContext,
        store: &mut Option<RunStore>,
    ) -> Result<(), WorkflowError> {
        match step.step_type {
            StepType::ApprovalGate => return self.handle_approval_gate(step, ctx),
            StepType::Refinement => {
                debug!(step = %step.id, "skipping refinement step (only runs on validation failure)");
                return Ok(());
            }
            StepType::Tool => {}
        }

        let (Some(tool), Some(action)) = (step.tool.as_deref(), step.action.as_deref()) else {
            warn!(step = %step.id, "step missing tool or action, skipping");
            return Ok(());
        };

        let resolved = resolve(&Value::Object(step.inputs.clone()), ctx);

        match self.dispatch(step, tool, action, &resolved, ctx) {
            Ok(()) => Ok(()),
            Err(error) => match step.on_failure {
                FailurePolicy::Abort => Err(error),
                FailurePolicy::Skip => {
                    warn!(step = %step.id, "step failed, skipping: {error}");
                    Ok(())
                }
                FailurePolicy::Retry => {
                    // Re-dispatch with the same resolved inputs.
                    let retry_count = step.retry_count.unwrap_or(1);
                    let mut last_error = error;
                    for attempt in 1..=retry_count {
                        info!(step = %step.id, "retrying ({attempt}/{retry_count})...");
                        match self.registry.execute(tool, action, &resolved, ctx) {
                            Ok(outputs) => {
                                ctx.set_step_output(&step.id, outputs);
                                return Ok(());
                            }
                            Err(retry_error) => {
                                warn!(step = %step.id, "retry {attempt} failed: {retry_error}");
                                last_error = retry_error;
                            }
                        }
                    }
                    Err(last_error)
                }
                FailurePolicy::Refine => {
                    info!(step = %step.id, "validation failed, triggering refinement loop");
                    self.execute_refinement(step, recipe, ctx, store)
                }
            },
        }
    }

    /// Dispatch a tool action, commit the outputs, and apply the gate
    /// verdict when the step is a gate.
    fn dispatch(
        &self,
        step: &Step,
        tool: &str,
        action: &str,
        resolved: &Value,
        ctx: &mut WorkflowContext,
    ) -> Result<(), WorkflowError> {
        let outputs = self.registry.execute(tool, action, resolved, ctx)?;

        // A gate with no `passed` field counts as passed.
        let gate_failed =
            step.gate && !is_truthy(outputs.get("passed").unwrap_or(&Value::Bool(true)));
        let failures = if gate_failed {
            failure_list(&outputs)
        } else {
            Vec::new()
        };

        if let Value::Object(map) = &outputs {
            let keys: Vec<&String> = map.keys().collect();
            info!(step = %step.id, "step completed: {keys:?}");
        }
        ctx.set_step_output(&step.id, outputs);

        if gate_failed {
            return Err(WorkflowError::ValidationFailed { failures });
        }
        Ok(())
    }

    /// Recovery loop entered when a validation step fails with the
    /// `refine` policy: run the refinement substeps, then re-validate,
    /// until the gate passes or the iteration cap is reached.
    fn execute_refinement<'a>(
        &self,
        failed_step: &'a Step,
        recipe: &'a Recipe,
        ctx: &mut WorkflowContext,
        store: &mut Option<RunStore>,
    ) -> Result<(), WorkflowError> {
        let max_iterations = ctx
            .config
            .get("max_iterations")
            .and_then(Value::as_u64)
            .unwrap_or(3);
        ctx.refinement_active = true;

        let Some(block) = find_refinement_block(failed_step, recipe) else {
            ctx.refinement_active = false;
            return Err(WorkflowError::NoRefinement {
                step: failed_step.id.clone(),
            });
        };
        if block.is_empty() {
            ctx.refinement_active = false;
            return Err(WorkflowError::EmptyRefinement {
                step: failed_step.id.clone(),
            });
        }

        ctx.iteration_count.insert(failed_step.id.clone(), 0);

        for iteration in 1..=max_iterations {
            ctx.iteration_count.insert(failed_step.id.clone(), iteration);
            info!(step = %failed_step.id, "refinement iteration {iteration}/{max_iterations}");

            // Substep failures are logged but never abort the iteration.
            for substep in block {
                if let Err(e) = self.execute_step(substep, recipe, ctx, store) {
                    warn!(step = %substep.id, "refinement step failed: {e}");
                }
            }

            let Some((tool, action)) = failed_step
                .tool
                .as_deref()
                .zip(failed_step.action.as_deref())
            else {
                break;
            };

            // Re-resolve so freshly produced substep outputs are picked up.
            let resolved = resolve(&Value::Object(failed_step.inputs.clone()), ctx);
            if let Some(s) = store.as_mut() {
                s.start_step(
                    &ctx.run_id,
                    &failed_step.id,
                    failed_step.display_name(),
                    &Value::Object(failed_step.inputs.clone()),
                )?;
            }

            match self.registry.execute(tool, action, &resolved, ctx) {
                Ok(outputs) => {
                    if is_truthy(outputs.get("passed").unwrap_or(&Value::Bool(false))) {
                        // Only a passing re-validation commits to the
                        // context; the store record still tracks attempts.
                        ctx.set_step_output(&failed_step.id, outputs);
                        if let Some(s) = store.as_mut() {
                            let entry = ctx
                                .step_output(&failed_step.id)
                                .cloned()
                                .unwrap_or_else(|| json!({}));
                            s.complete_step(&ctx.run_id, &failed_step.id, &entry)?;
                        }
                        info!(
                            step = %failed_step.id,
                            "validation passed after {iteration} refinement iterations"
                        );
                        ctx.refinement_active = false;
                        return Ok(());
                    }
                    let failures = failure_list(&outputs);
                    info!(step = %failed_step.id, "validation still failing: {failures:?}");
                    if let Some(s) = store.as_mut() {
                        s.fail_step(
                            &ctx.run_id,
                            &failed_step.id,
                            &format!("validation still failing: {failures:?}"),
                        )?;
                    }
                }
                Err(e) => {
                    warn!(step = %failed_step.id, "re-validation error: {e}");
                    if let Some(s) = store.as_mut() {
                        s.fail_step(&ctx.run_id, &failed_step.id, &e.to_string())?;
                    }
                }
            }
        }

        ctx.refinement_active = false;
        Err(WorkflowError::RefinementExhausted {
            step: failed_step.id.clone(),
            iterations: max_iterations,
        })
    }

    fn handle_approval_gate(
        &self,
        step: &Step,
        ctx: &mut WorkflowContext,
    ) -> Result<(), WorkflowError> {
        let message =
            resolver::resolve_str(step.message.as_deref().unwrap_or("Approval required"), ctx);
        let default_options = vec!["approve".to_string(), "reject".to_string()];
        let options = step
            .options
            .as_ref()
            .filter(|o| !o.is_empty())
            .unwrap_or(&default_options);
        let default = step
            .default_action
            .clone()
            .unwrap_or_else(|| options[0].clone());

        if self.auto_approve {
            info!(step = %step.id, "auto-approving: {default}");
            ctx.set_step_output(&step.id, json!({ "selection": default, "auto": true }));
            return Ok(());
        }

        println!("\n{}", "=".repeat(60));
        println!("APPROVAL REQUIRED: {}", step.display_name());
        println!("{}", "=".repeat(60));
        println!("{message}");
        println!("\nOptions: {}", options.join(", "));
        println!("Default: {default}");
        print!("\nYour choice [{default}]: ");
        io::stdout().flush()?;

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            // End of input or a broken terminal selects the default.
            Ok(0) | Err(_) => {
                info!(step = %step.id, "using default: {default}");
                ctx.set_step_output(&step.id, json!({ "selection": default, "auto": true }));
            }
            Ok(_) => {
                let choice = line.trim();
                let selection = if choice.is_empty() {
                    default.as_str()
                } else {
                    choice
                };
                ctx.set_step_output(&step.id, json!({ "selection": selection, "auto": false }));
            }
        }
        Ok(())
    }
}

/// Locate the refinement block for a failed step: inline block first, then
/// a refinement-typed step whose trigger names the failed step, then the
/// recipe-level fallback.
fn find_refinement_block<'a>(failed_step: &'a Step, recipe: &'a Recipe) -> Option<&'a [Step]> {
    if let Some(block) = &failed_step.refinement {
        return Some(&block.steps);
    }

    for step in &recipe.steps {
        if step.step_type != StepType::Refinement {
            continue;
        }
        let Some(trigger) = step.trigger.as_deref() else {
            continue;
        };
        if trigger == format!("{}.failed", failed_step.id) || trigger == failed_step.id {
            return Some(step.steps.as_deref().unwrap_or(&[]));
        }
    }

    recipe.refinement.as_ref().map(|block| block.steps.as_slice())
}

fn failure_list(outputs: &Value) -> Vec<String> {
    outputs
        .get("failures")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
