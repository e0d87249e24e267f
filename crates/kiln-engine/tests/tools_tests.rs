//! Built-in tool adapter tests.

use kiln_engine::recipe::parse_recipe_str;
use kiln_engine::{ToolRegistry, WorkflowContext, WorkflowError};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

fn test_ctx(dir: &TempDir) -> WorkflowContext {
    let recipe = parse_recipe_str("name: tool-tests\nsteps:\n  - id: s\n").expect("valid recipe");
    WorkflowContext::new(&recipe, Map::new(), dir.path()).expect("context dirs")
}

fn execute(
    registry: &ToolRegistry,
    ctx: &WorkflowContext,
    tool: &str,
    action: &str,
    inputs: Value,
) -> Result<Value, WorkflowError> {
    registry.execute(tool, action, &inputs, ctx)
}

#[test]
fn builtins_are_registered_and_sorted() {
    let registry = ToolRegistry::with_builtins();
    assert_eq!(
        registry.available_tools(),
        vec!["batch", "file_ops", "script", "validator"]
    );
}

#[test]
fn preflight_reports_builtins_ready() {
    let registry = ToolRegistry::with_builtins();
    for (name, ready) in registry.preflight_check() {
        assert!(ready, "{name} should be ready");
    }
    assert!(registry.load_errors().is_empty());
}

#[test]
fn unknown_tool_dispatch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();
    let err = execute(&registry, &ctx, "nonexistent", "go", json!({})).unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownTool { .. }));
    assert!(err.to_string().contains("batch, file_ops, script, validator"));
}

#[test]
fn unknown_action_is_a_tool_failure() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();
    let err = execute(&registry, &ctx, "file_ops", "shred", json!({})).unwrap_err();
    assert!(err.to_string().contains("unknown file_ops action"));
}

// --- file_ops ---

#[test]
fn file_ops_mkdir_copy_list_delete() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let work = ctx.temp_dir.join("work");
    execute(
        &registry,
        &ctx,
        "file_ops",
        "mkdir",
        json!({ "path": work.display().to_string() }),
    )
    .unwrap();
    assert!(work.is_dir());

    let src = dir.path().join("a.txt");
    std::fs::write(&src, "payload").unwrap();
    let dst = work.join("nested").join("a.txt");
    let outputs = execute(
        &registry,
        &ctx,
        "file_ops",
        "copy",
        json!({
            "source": src.display().to_string(),
            "destination": dst.display().to_string(),
        }),
    )
    .unwrap();
    assert!(dst.is_file());
    assert_eq!(outputs["destination"], json!(dst.display().to_string()));

    let listed = execute(
        &registry,
        &ctx,
        "file_ops",
        "list",
        json!({
            "path": work.join("nested").display().to_string(),
            "pattern": "*.txt",
        }),
    )
    .unwrap();
    assert_eq!(listed["count"], json!(1));

    execute(
        &registry,
        &ctx,
        "file_ops",
        "delete",
        json!({ "path": work.display().to_string() }),
    )
    .unwrap();
    assert!(!work.exists());
}

#[test]
fn file_ops_move_replaces_the_source() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let src = dir.path().join("from.txt");
    std::fs::write(&src, "data").unwrap();
    let dst = dir.path().join("moved").join("to.txt");

    execute(
        &registry,
        &ctx,
        "file_ops",
        "move",
        json!({
            "source": src.display().to_string(),
            "destination": dst.display().to_string(),
        }),
    )
    .unwrap();

    assert!(!src.exists());
    assert_eq!(std::fs::read_to_string(&dst).unwrap(), "data");
}

// --- validator ---

#[test]
fn validator_passes_a_healthy_file() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let file = dir.path().join("texture.png");
    std::fs::write(&file, vec![0u8; 128]).unwrap();

    let outputs = execute(
        &registry,
        &ctx,
        "validator",
        "check_file",
        json!({
            "file": file.display().to_string(),
            "checks": { "min_size_bytes": 64, "extension": "png", "non_empty": true },
        }),
    )
    .unwrap();

    assert_eq!(outputs["passed"], json!(true));
    assert_eq!(outputs["failures"], json!([]));
}

#[test]
fn validator_reports_each_failed_check() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let file = dir.path().join("tiny.jpg");
    std::fs::write(&file, b"x").unwrap();

    let outputs = execute(
        &registry,
        &ctx,
        "validator",
        "check_file",
        json!({
            "file": file.display().to_string(),
            "checks": { "min_size_bytes": 1024, "extension": "png" },
        }),
    )
    .unwrap();

    assert_eq!(outputs["passed"], json!(false));
    let failures = outputs["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 2);
}

#[test]
fn validator_fails_missing_files() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let outputs = execute(
        &registry,
        &ctx,
        "validator",
        "check_file",
        json!({ "file": dir.path().join("ghost.png").display().to_string() }),
    )
    .unwrap();

    assert_eq!(outputs["passed"], json!(false));
    assert!(outputs["failures"][0]
        .as_str()
        .unwrap()
        .contains("file not found"));
}

#[test]
fn validator_checks_a_directory_with_min_count() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    std::fs::write(dir.path().join("one.png"), b"data").unwrap();

    let outputs = execute(
        &registry,
        &ctx,
        "validator",
        "check_files",
        json!({
            "dir": dir.path().display().to_string(),
            "pattern": "*.png",
            "checks": { "non_empty": true, "min_count": 3 },
        }),
    )
    .unwrap();

    assert_eq!(outputs["passed"], json!(false));
    assert_eq!(outputs["checked"], json!(1));
}

// --- script ---

#[test]
fn script_runs_and_captures_output() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let script = dir.path().join("hello.sh");
    std::fs::write(&script, "echo \"hello $1\"\n").unwrap();

    let outputs = execute(
        &registry,
        &ctx,
        "script",
        "run",
        json!({
            "script": script.display().to_string(),
            "args": "from-kiln",
        }),
    )
    .unwrap();

    assert_eq!(outputs["success"], json!(true));
    assert_eq!(outputs["return_code"], json!(0));
    assert!(outputs["stdout"].as_str().unwrap().contains("hello from-kiln"));
}

#[test]
fn script_nonzero_exit_is_reported_not_raised() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let script = dir.path().join("fail.sh");
    std::fs::write(&script, "echo oops >&2\nexit 3\n").unwrap();

    let outputs = execute(
        &registry,
        &ctx,
        "script",
        "run",
        json!({ "script": script.display().to_string() }),
    )
    .unwrap();

    assert_eq!(outputs["success"], json!(false));
    assert_eq!(outputs["return_code"], json!(3));
    assert!(outputs["stderr"].as_str().unwrap().contains("oops"));
}

#[test]
fn script_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let err = execute(
        &registry,
        &ctx,
        "script",
        "run",
        json!({ "script": dir.path().join("missing.sh").display().to_string() }),
    )
    .unwrap_err();

    assert!(err.to_string().contains("script not found"));
}

// --- batch ---

#[test]
fn batch_foreach_runs_steps_per_item() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let outputs = execute(
        &registry,
        &ctx,
        "batch",
        "foreach",
        json!({
            "items": "alpha, beta",
            "workflow_steps": [
                {
                    "id": "make",
                    "tool": "file_ops",
                    "action": "mkdir",
                    "inputs": { "path": "{{temp_dir}}/item-{{item}}" },
                }
            ],
        }),
    )
    .unwrap();

    assert_eq!(outputs["count"], json!(2));
    assert!(ctx.temp_dir.join("item-alpha").is_dir());
    assert!(ctx.temp_dir.join("item-beta").is_dir());
    assert_eq!(outputs["results"][1]["item"], json!("beta"));
    assert_eq!(outputs["results"][1]["index"], json!(1));
}

#[test]
fn batch_foreach_chains_outputs_within_an_item() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let outputs = execute(
        &registry,
        &ctx,
        "batch",
        "foreach",
        json!({
            "items": ["x"],
            "workflow_steps": [
                {
                    "id": "make",
                    "tool": "file_ops",
                    "action": "mkdir",
                    "inputs": { "path": "{{temp_dir}}/chain-{{item}}" },
                },
                {
                    "id": "check",
                    "tool": "file_ops",
                    "action": "list",
                    "inputs": { "path": "{{make.outputs.created}}", "pattern": "*" },
                }
            ],
        }),
    )
    .unwrap();

    assert_eq!(outputs["results"][0]["outputs"]["check"]["count"], json!(0));
}

#[test]
fn batch_foreach_reaches_externally_registered_tools() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut registry = ToolRegistry::with_builtins();
    registry.register_fn("stamp", |_a, inputs, _c| {
        Ok(json!({ "stamped": inputs["value"] }))
    });

    let outputs = execute(
        &registry,
        &ctx,
        "batch",
        "foreach",
        json!({
            "items": ["a", "b"],
            "workflow_steps": [
                {
                    "id": "mark",
                    "tool": "stamp",
                    "action": "apply",
                    "inputs": { "value": "{{item}}" },
                }
            ],
        }),
    )
    .unwrap();

    assert_eq!(outputs["results"][0]["outputs"]["mark"]["stamped"], json!("a"));
    assert_eq!(outputs["results"][1]["outputs"]["mark"]["stamped"], json!("b"));
}

#[test]
fn batch_foreach_without_steps_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let registry = ToolRegistry::with_builtins();

    let err = execute(&registry, &ctx, "batch", "foreach", json!({ "items": "a" })).unwrap_err();
    assert!(err.to_string().contains("requires workflow_steps"));
}
