//! Recipe schema: parsing and validation.
//!
//! Recipes are YAML documents with:
//! - metadata (`name`, `description`, `version`)
//! - a `config` mapping of user scalars referenced via `{{config.*}}`
//! - reusable `templates` fragments referenced via `{{templates.*}}`
//! - declared `inputs` with defaults, required flags, and choices
//! - an ordered `steps` sequence
//! - an optional recipe-level `refinement` fallback block
//! - `cleanup` action lists for success and failure exits

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;

/// The root document structure for a recipe file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Unique recipe name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// User-defined scalars and nested maps, referenced via `{{config.*}}`.
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Reusable string fragments, referenced via `{{templates.*}}`.
    #[serde(default)]
    pub templates: Map<String, Value>,

    #[serde(default)]
    pub inputs: Vec<InputDecl>,

    /// Sequential steps to execute.
    pub steps: Vec<Step>,

    /// Recipe-level refinement fallback, used when a failing validation step
    /// has neither an inline block nor a matching trigger step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<RefinementBlock>,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Declared workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enumerated allowed values, enforced when a value is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    #[default]
    Tool,
    ApprovalGate,
    Refinement,
}

/// Per-step failure policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Skip,
    Retry,
    Refine,
}

/// A single step within a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier within the recipe.
    pub id: String,

    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default)]
    pub step_type: StepType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Raw tool inputs; `{{…}}` placeholders are resolved just before
    /// dispatch.
    #[serde(default)]
    pub inputs: Map<String, Value>,

    /// Treat the tool's `passed` output as a pass/fail verdict.
    #[serde(default)]
    pub gate: bool,

    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Additional attempts when `on_failure` is `retry`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    /// Inline refinement block attached to this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<RefinementBlock>,

    // Approval-gate fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<String>,

    // Standalone refinement-step fields
    /// Matches `<step_id>.failed` (or the bare `<step_id>`) of the
    /// validation step this block recovers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

impl Step {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// An ordered sequence of recovery substeps run between validation attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementBlock {
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub on_success: Vec<CleanupAction>,

    #[serde(default)]
    pub on_failure: Vec<CleanupAction>,
}

/// Filesystem actions run after the workflow exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CleanupAction {
    Delete {
        path: String,
    },
    Move {
        source: String,
        destination: String,
    },
    Preserve {
        path: String,
        #[serde(default)]
        reason: String,
    },
}

// --- Parser ---

/// Parse and validate a recipe file.
pub fn parse_recipe_file(path: &Path) -> Result<Recipe, WorkflowError> {
    let content = fs::read_to_string(path)
        .map_err(|e| WorkflowError::RecipeParse(format!("{}: {e}", path.display())))?;
    parse_recipe_str(&content)
}

/// Parse and validate a recipe from YAML text.
pub fn parse_recipe_str(content: &str) -> Result<Recipe, WorkflowError> {
    let recipe: Recipe =
        serde_yaml::from_str(content).map_err(|e| WorkflowError::RecipeParse(e.to_string()))?;
    validate_recipe(&recipe)?;
    Ok(recipe)
}

/// Validate a parsed recipe before any run state exists.
pub fn validate_recipe(recipe: &Recipe) -> Result<(), WorkflowError> {
    if recipe.steps.is_empty() {
        return Err(WorkflowError::RecipeParse(
            "recipe must define at least one step".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for step in &recipe.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::RecipeParse(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
        validate_step(step)?;
    }

    Ok(())
}

fn validate_step(step: &Step) -> Result<(), WorkflowError> {
    if step.on_failure == FailurePolicy::Retry {
        if let Some(0) = step.retry_count {
            return Err(WorkflowError::RecipeParse(format!(
                "step '{}': retry_count must be at least 1",
                step.id
            )));
        }
    }

    if step.trigger.is_some() && step.step_type != StepType::Refinement {
        return Err(WorkflowError::RecipeParse(format!(
            "step '{}': trigger is only valid on refinement steps",
            step.id
        )));
    }

    if step.step_type == StepType::ApprovalGate {
        if let Some(options) = &step.options {
            if options.is_empty() {
                return Err(WorkflowError::RecipeParse(format!(
                    "approval gate '{}' has empty options",
                    step.id
                )));
            }
        }
    }

    Ok(())
}

// --- Input resolution ---

/// Resolve provided input values against the recipe's declarations: apply
/// defaults, reject missing required inputs, and enforce declared choices.
pub fn resolve_recipe_inputs(
    recipe: &Recipe,
    provided: &Map<String, Value>,
) -> Result<Map<String, Value>, WorkflowError> {
    let mut inputs = provided.clone();

    for decl in &recipe.inputs {
        if !inputs.contains_key(&decl.name) {
            if let Some(default) = &decl.default {
                inputs.insert(decl.name.clone(), default.clone());
            }
        }
    }

    let missing: Vec<String> = recipe
        .inputs
        .iter()
        .filter(|decl| decl.required && !inputs.contains_key(&decl.name))
        .map(|decl| decl.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(WorkflowError::MissingInputs { names: missing });
    }

    for decl in &recipe.inputs {
        let (Some(choices), Some(value)) = (&decl.choices, inputs.get(&decl.name)) else {
            continue;
        };
        if !choices.contains(value) {
            return Err(WorkflowError::InvalidChoice {
                input: decl.name.clone(),
                value: crate::resolver::display_value(value),
                choices: choices.iter().map(crate::resolver::display_value).collect(),
            });
        }
    }

    Ok(inputs)
}
