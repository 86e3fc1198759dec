//! CLI integration tests for distrun
//!
//! Each test works in its own temporary project directory.

use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn distrun_cmd(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("distrun"));
    cmd.current_dir(dir.path()).arg("--no-color");
    cmd
}

/// `distrun init` plus the manifests the generated config imports
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    distrun_cmd(&dir).arg("init").assert().success();
    fs::write(
        dir.path().join("package.json"),
        r#"{ "name": "melonjs", "version": "10.2.1" }"#,
    )
    .unwrap();
    fs::write(dir.path().join("sources.json"), r#"["src/me.js"]"#).unwrap();
    dir
}

// =============================================================================
// Initialization
// =============================================================================

#[test]
fn test_init_creates_config_and_script() {
    let dir = TempDir::new().unwrap();

    distrun_cmd(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created distrun.toml"));

    assert!(dir.path().join("distrun.toml").is_file());
    assert!(dir.path().join("tasks/dorelease.rhai").is_file());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = setup_project();

    distrun_cmd(&dir).arg("init").assert().failure();
    distrun_cmd(&dir).args(["init", "--force"]).assert().success();
}

#[test]
fn test_check_generated_config() {
    let dir = setup_project();

    distrun_cmd(&dir)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn test_missing_config() {
    let dir = TempDir::new().unwrap();

    distrun_cmd(&dir)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

// =============================================================================
// Listing and graphs
// =============================================================================

#[test]
fn test_list_includes_aliases_groups_and_scripts() {
    let dir = setup_project();

    distrun_cmd(&dir)
        .args(["list", "--format", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("replace:dist"))
        .stdout(predicate::str::contains("gh-pages"))
        .stdout(predicate::str::contains("dorelease"))
        .stdout(predicate::str::is_match("(?m)^concat$").unwrap());
}

#[test]
fn test_graph_dot_lists_member_edges() {
    let dir = setup_project();

    distrun_cmd(&dir)
        .args(["graph", "lint", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"lint\" -> \"glsl\";"))
        .stdout(predicate::str::contains("\"glsl\" -> \"dot:glsl\";"));
}

#[test]
fn test_dry_run_prints_expanded_sequence() {
    let dir = setup_project();

    distrun_cmd(&dir)
        .args(["run", "--dry-run", "gh-pages"])
        .assert()
        .success()
        .stdout(predicate::str::contains("eslint:beforeConcat"))
        .stdout(predicate::str::contains("eslint:afterConcat"))
        .stdout(predicate::str::contains("karma:unit"))
        .stdout(predicate::str::contains("jsdoc:dist"))
        .stdout(predicate::str::contains("copy:dist"))
        .stdout(predicate::str::contains("buildGhPages:dist"));

    assert!(!dir.path().join("build").exists());
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_generated_aliases() {
    let dir = setup_project();

    distrun_cmd(&dir)
        .args(["graph", "default", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"default\" -> \"test\";"))
        .stdout(predicate::str::contains("\"default\" -> \"uglify\";"))
        .stdout(predicate::str::contains("\"lint\" -> \"eslint:beforeConcat\";"))
        .stdout(predicate::str::contains("\"default\" -> \"doc\";").not());

    distrun_cmd(&dir)
        .args(["graph", "es2015", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"babel\" -> \"babel:dist\";"));
}

#[test]
fn test_unknown_task() {
    let dir = setup_project();

    distrun_cmd(&dir)
        .arg("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task 'nope' not found"));
}

// =============================================================================
// Running
// =============================================================================

#[test]
fn test_script_task_output() {
    let dir = setup_project();

    distrun_cmd(&dir)
        .args(["-v", "dorelease"])
        .assert()
        .success()
        .stdout(predicate::str::contains("releasing melonjs 10.2.2"));
}

#[test]
fn test_failure_stops_the_sequence() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("distrun.toml"),
        r#"
[properties]
out = "build/out.txt"

[aliases]
ship = ["concat:out", "exec:fail", "copy:out"]

[tasks."concat:out"]
op = "concat"
src = ["a.txt", "b.txt"]
dest = "<%= out %>"

[tasks."exec:fail"]
op = "exec"
command = "exit 3"
shell = true

[tasks."copy:out"]
op = "copy"
files = [{ src = ["<%= out %>"], dest = "dist/" }]
"#,
    )
    .unwrap();
    fs::write(dir.path().join("a.txt"), "a").unwrap();
    fs::write(dir.path().join("b.txt"), "b").unwrap();

    distrun_cmd(&dir)
        .arg("ship")
        .assert()
        .failure()
        .stdout(predicate::str::contains("skipped: copy:out"))
        .stderr(predicate::str::contains("exec:fail"));

    assert_eq!(
        fs::read_to_string(dir.path().join("build/out.txt")).unwrap(),
        "a\nb"
    );
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_unresolved_reference_runs_nothing() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("distrun.toml"),
        r#"
[aliases]
ship = ["clean:build", "concat:out"]

[tasks."clean:build"]
op = "clean"
paths = ["build"]

[tasks."concat:out"]
op = "concat"
src = ["a.txt"]
dest = "<%= path.missing %>"
"#,
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("build")).unwrap();
    fs::write(dir.path().join("a.txt"), "a").unwrap();

    distrun_cmd(&dir)
        .arg("ship")
        .assert()
        .failure()
        .stderr(predicate::str::contains("path.missing"));

    assert!(dir.path().join("build").is_dir());
}
