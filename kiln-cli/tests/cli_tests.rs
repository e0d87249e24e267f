//! End-to-end tests for the `kiln` binary.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn kiln_cmd() -> Command {
    Command::cargo_bin("kiln").expect("kiln binary should build")
}

fn write_config(dir: &Path, persistence: bool) {
    let config = format!(
        "run_dir: ./runs\noutput_dir: ./output\npersistence:\n  enabled: {persistence}\n  db_path: ./runs.db\n"
    );
    std::fs::write(dir.join("kiln.yaml"), config).expect("config should be writable");
}

#[test]
fn run_completes_a_local_recipe() {
    let dir = tempdir().unwrap();
    write_config(dir.path(), false);
    std::fs::write(
        dir.path().join("hello.yaml"),
        r#"
name: hello
inputs:
  - name: label
    required: true
steps:
  - id: make
    tool: file_ops
    action: mkdir
    inputs:
      path: "{{temp_dir}}/{{inputs.label}}"
"#,
    )
    .unwrap();

    kiln_cmd()
        .current_dir(dir.path())
        .args(["run", "hello.yaml", "--input", "label=demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workflow completed successfully"));
}

#[test]
fn run_rejects_missing_required_inputs() {
    let dir = tempdir().unwrap();
    write_config(dir.path(), false);
    std::fs::write(
        dir.path().join("hello.yaml"),
        "name: hello\ninputs:\n  - name: label\n    required: true\nsteps:\n  - id: noop\n",
    )
    .unwrap();

    kiln_cmd()
        .current_dir(dir.path())
        .args(["run", "hello.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required inputs: label"));
}

#[test]
fn run_maps_workflow_failure_to_nonzero_exit() {
    let dir = tempdir().unwrap();
    write_config(dir.path(), false);
    std::fs::write(
        dir.path().join("gate.yaml"),
        r#"
name: gate
steps:
  - id: validate
    tool: validator
    action: check_file
    gate: true
    inputs:
      file: "{{temp_dir}}/never-produced.png"
"#,
    )
    .unwrap();

    kiln_cmd()
        .current_dir(dir.path())
        .args(["run", "gate.yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Workflow failed"));
}

#[test]
fn run_list_inputs_shows_declarations() {
    let dir = tempdir().unwrap();
    write_config(dir.path(), false);
    std::fs::write(
        dir.path().join("hello.yaml"),
        r#"
name: hello
description: Greets somebody
inputs:
  - name: who
    description: Who to greet
    required: true
  - name: tone
    choices: [warm, formal]
    default: warm
steps:
  - id: noop
"#,
    )
    .unwrap();

    kiln_cmd()
        .current_dir(dir.path())
        .args(["run", "hello.yaml", "--list-inputs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("who"))
        .stdout(predicate::str::contains("warm, formal"))
        .stdout(predicate::str::contains("default: warm"));
}

#[test]
fn run_missing_recipe_is_an_error() {
    let dir = tempdir().unwrap();
    write_config(dir.path(), false);

    kiln_cmd()
        .current_dir(dir.path())
        .args(["run", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("recipe not found"));
}

#[test]
fn history_shows_persisted_runs() {
    let dir = tempdir().unwrap();
    write_config(dir.path(), true);
    std::fs::write(
        dir.path().join("hello.yaml"),
        r#"
name: hello
steps:
  - id: make
    tool: file_ops
    action: mkdir
    inputs:
      path: "{{temp_dir}}/made"
"#,
    )
    .unwrap();

    kiln_cmd()
        .current_dir(dir.path())
        .args(["run", "hello.yaml"])
        .assert()
        .success();

    kiln_cmd()
        .current_dir(dir.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn tools_lists_builtin_adapters() {
    let dir = tempdir().unwrap();
    kiln_cmd()
        .current_dir(dir.path())
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("file_ops"))
        .stdout(predicate::str::contains("script"))
        .stdout(predicate::str::contains("validator"))
        .stdout(predicate::str::contains("batch"));
}

#[test]
fn list_shows_recipes_in_a_directory() {
    let dir = tempdir().unwrap();
    let recipes = dir.path().join("recipes");
    std::fs::create_dir_all(&recipes).unwrap();
    std::fs::write(
        recipes.join("one.yaml"),
        "name: one\ndescription: First recipe\nsteps:\n  - id: s\n",
    )
    .unwrap();

    kiln_cmd()
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("one"))
        .stdout(predicate::str::contains("First recipe"));
}
