//! Per-run mutable state shared with every step.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde_json::{json, Map, Value};

use crate::recipe::Recipe;
use kiln_core::ids;

/// Holds state during workflow execution.
///
/// The context owns the run and temp directories (created up front, alive
/// for the whole run) and the `steps_output` map, which only the runner
/// mutates — and only when a step commits.
#[derive(Debug)]
pub struct WorkflowContext {
    /// Opaque 8-character run identifier.
    pub run_id: String,

    pub run_dir: PathBuf,

    /// Scratch directory handed to tools, child of `run_dir`.
    pub temp_dir: PathBuf,

    /// Name of the recipe being executed.
    pub workflow_name: String,

    /// The recipe's `config` block.
    pub config: Map<String, Value>,

    /// The recipe's `templates` block.
    pub templates: Map<String, Value>,

    /// Resolved input values; frozen for the lifetime of the run.
    pub inputs: Map<String, Value>,

    /// Committed step outputs, keyed by step id. Each entry has the shape
    /// `{"outputs": {…}}`.
    pub steps_output: Map<String, Value>,

    pub start_time: DateTime<Local>,

    pub current_step: Option<String>,

    /// Errors accumulated across the run, in order.
    pub errors: Vec<String>,

    /// Refinement iterations performed, per step id.
    pub iteration_count: HashMap<String, u64>,

    pub refinement_active: bool,
}

impl WorkflowContext {
    /// Create the context for a fresh run, creating its directories.
    pub fn new(
        recipe: &Recipe,
        inputs: Map<String, Value>,
        run_base_dir: &Path,
    ) -> io::Result<Self> {
        let run_id = ids::new_id();
        let run_dir = run_base_dir.join(&run_id);
        let temp_dir = run_dir.join("temp");
        fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            run_id,
            run_dir,
            temp_dir,
            workflow_name: recipe.name.clone(),
            config: recipe.config.clone(),
            templates: recipe.templates.clone(),
            inputs,
            steps_output: Map::new(),
            start_time: Local::now(),
            current_step: None,
            errors: Vec::new(),
            iteration_count: HashMap::new(),
            refinement_active: false,
        })
    }

    /// Store outputs from a completed step.
    pub fn set_step_output(&mut self, step_id: &str, outputs: Value) {
        self.steps_output
            .insert(step_id.to_string(), json!({ "outputs": outputs }));
    }

    /// Committed outputs entry (`{"outputs": {…}}`) for a step, if any.
    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.steps_output.get(step_id)
    }
}
