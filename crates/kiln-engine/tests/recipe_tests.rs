//! Recipe schema parsing and validation tests.

use kiln_engine::recipe::{
    parse_recipe_str, resolve_recipe_inputs, CleanupAction, FailurePolicy, StepType,
};
use kiln_engine::WorkflowError;
use serde_json::{json, Map, Value};

const FULL_RECIPE: &str = r#"
name: texture-pipeline
description: Generate and validate a tileable texture
version: "1.2"
config:
  max_iterations: 2
  style: stone
templates:
  prompt: "A seamless {{config.style}} texture"
inputs:
  - name: subject
    description: What to render
    required: true
  - name: size
    default: 512
  - name: quality
    choices: [draft, final]
    default: draft
steps:
  - id: generate
    name: Generate texture
    tool: script
    action: run
    inputs:
      script: "{{inputs.subject}}.sh"
  - id: validate
    tool: validator
    action: check_file
    gate: true
    on_failure: refine
    refinement:
      steps:
        - id: generate
          tool: script
          action: run
  - id: confirm
    type: approval_gate
    message: "Ship {{steps.generate.outputs.stdout}}?"
    options: [ship, hold]
    default_action: hold
  - id: recover
    type: refinement
    trigger: validate.failed
    steps:
      - id: generate
        tool: script
        action: run
refinement:
  steps:
    - id: generate
      tool: script
      action: run
cleanup:
  on_success:
    - action: delete
      path: "{{temp_dir}}"
  on_failure:
    - action: preserve
      path: "{{workflow.run_dir}}"
      reason: debugging
    - action: move
      source: "{{temp_dir}}/partial.png"
      destination: "{{workflow.run_dir}}/partial.png"
"#;

#[test]
fn parses_a_complete_recipe() {
    let recipe = parse_recipe_str(FULL_RECIPE).expect("recipe should parse");
    assert_eq!(recipe.name, "texture-pipeline");
    assert_eq!(recipe.version.as_deref(), Some("1.2"));
    assert_eq!(recipe.config["max_iterations"], json!(2));
    assert_eq!(recipe.inputs.len(), 3);
    assert!(recipe.inputs[0].required);
    assert_eq!(recipe.inputs[1].default, Some(json!(512)));
    assert_eq!(recipe.steps.len(), 4);
    assert!(recipe.refinement.is_some());
    assert_eq!(recipe.cleanup.on_success.len(), 1);
    assert_eq!(recipe.cleanup.on_failure.len(), 2);
}

#[test]
fn step_fields_default_sensibly() {
    let recipe = parse_recipe_str(FULL_RECIPE).expect("recipe should parse");
    let generate = &recipe.steps[0];
    assert_eq!(generate.step_type, StepType::Tool);
    assert_eq!(generate.on_failure, FailurePolicy::Abort);
    assert!(!generate.gate);

    let validate = &recipe.steps[1];
    assert!(validate.gate);
    assert_eq!(validate.on_failure, FailurePolicy::Refine);
    assert!(validate.refinement.is_some());

    let confirm = &recipe.steps[2];
    assert_eq!(confirm.step_type, StepType::ApprovalGate);
    assert_eq!(confirm.default_action.as_deref(), Some("hold"));

    let recover = &recipe.steps[3];
    assert_eq!(recover.step_type, StepType::Refinement);
    assert_eq!(recover.trigger.as_deref(), Some("validate.failed"));
}

#[test]
fn cleanup_actions_parse_as_tagged_variants() {
    let recipe = parse_recipe_str(FULL_RECIPE).expect("recipe should parse");
    assert!(matches!(
        recipe.cleanup.on_success[0],
        CleanupAction::Delete { .. }
    ));
    assert!(matches!(
        recipe.cleanup.on_failure[0],
        CleanupAction::Preserve { .. }
    ));
    assert!(matches!(
        recipe.cleanup.on_failure[1],
        CleanupAction::Move { .. }
    ));
}

#[test]
fn recipe_without_steps_fails_to_parse() {
    let err = parse_recipe_str("name: broken\n").unwrap_err();
    assert!(matches!(err, WorkflowError::RecipeParse(_)));
}

#[test]
fn recipe_with_empty_steps_is_rejected() {
    let err = parse_recipe_str("name: broken\nsteps: []\n").unwrap_err();
    assert!(err.to_string().contains("at least one step"));
}

#[test]
fn malformed_yaml_is_rejected() {
    let err = parse_recipe_str("name: [unclosed\n").unwrap_err();
    assert!(matches!(err, WorkflowError::RecipeParse(_)));
}

#[test]
fn duplicate_step_ids_are_rejected() {
    let err = parse_recipe_str(
        "name: dup\nsteps:\n  - id: a\n  - id: a\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate step id 'a'"));
}

#[test]
fn zero_retry_count_is_rejected() {
    let err = parse_recipe_str(
        "name: r\nsteps:\n  - id: a\n    on_failure: retry\n    retry_count: 0\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("retry_count"));
}

#[test]
fn trigger_on_non_refinement_step_is_rejected() {
    let err = parse_recipe_str(
        "name: t\nsteps:\n  - id: a\n    trigger: b.failed\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("trigger"));
}

#[test]
fn approval_gate_with_empty_options_is_rejected() {
    let err = parse_recipe_str(
        "name: g\nsteps:\n  - id: a\n    type: approval_gate\n    options: []\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("options"));
}

// --- Input resolution ---

fn provided(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn defaults_fill_absent_inputs() {
    let recipe = parse_recipe_str(FULL_RECIPE).expect("recipe should parse");
    let inputs =
        resolve_recipe_inputs(&recipe, &provided(&[("subject", json!("moss"))])).unwrap();
    assert_eq!(inputs["subject"], json!("moss"));
    assert_eq!(inputs["size"], json!(512));
    assert_eq!(inputs["quality"], json!("draft"));
}

#[test]
fn missing_required_inputs_are_reported() {
    let recipe = parse_recipe_str(FULL_RECIPE).expect("recipe should parse");
    let err = resolve_recipe_inputs(&recipe, &Map::new()).unwrap_err();
    match err {
        WorkflowError::MissingInputs { names } => assert_eq!(names, vec!["subject"]),
        other => panic!("expected MissingInputs, got {other}"),
    }
}

#[test]
fn supplied_values_must_match_choices() {
    let recipe = parse_recipe_str(FULL_RECIPE).expect("recipe should parse");
    let err = resolve_recipe_inputs(
        &recipe,
        &provided(&[("subject", json!("moss")), ("quality", json!("sloppy"))]),
    )
    .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidChoice { .. }));

    let inputs = resolve_recipe_inputs(
        &recipe,
        &provided(&[("subject", json!("moss")), ("quality", json!("final"))]),
    )
    .unwrap();
    assert_eq!(inputs["quality"], json!("final"));
}
