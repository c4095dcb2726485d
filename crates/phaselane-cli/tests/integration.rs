#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn phaselane(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("phaselane").unwrap();
    cmd.current_dir(dir.path())
        .env("PHASELANE_ROOT", dir.path())
        .env_remove("PHASELANE_SMOKE_TEST")
        .env_remove("PHASELANE_ALLOWED_OPERATIONS");
    cmd
}

fn init_project(dir: &TempDir) {
    phaselane(dir).arg("init").assert().success();
}

fn responses(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn by_id(responses: &[Value], id: i64) -> &Value {
    responses
        .iter()
        .find(|r| r["id"] == id)
        .unwrap_or_else(|| panic!("no response with id {id}"))
}

// ---------------------------------------------------------------------------
// phaselane init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_project_files() {
    let dir = TempDir::new().unwrap();
    phaselane(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .phaselane/config.yaml"));

    assert!(dir.path().join(".phaselane").is_dir());
    assert!(dir.path().join(".phaselane/config.yaml").exists());
    assert!(dir.path().join(".phaselane/state.yaml").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    phaselane(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .phaselane/state.yaml"));
}

// ---------------------------------------------------------------------------
// phaselane checkpoints
// ---------------------------------------------------------------------------

#[test]
fn checkpoints_lists_public_registry() {
    let dir = TempDir::new().unwrap();
    phaselane(&dir)
        .arg("checkpoints")
        .assert()
        .success()
        .stdout(predicate::str::contains("pm_plan_review"))
        .stdout(predicate::str::contains("architecture_design_review"))
        .stdout(predicate::str::contains("story_scope_review"))
        .stdout(predicate::str::contains("story_context_validation").not());
}

#[test]
fn checkpoints_json_is_parseable() {
    let dir = TempDir::new().unwrap();
    let output = phaselane(&dir)
        .args(["checkpoints", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// smoke test
// ---------------------------------------------------------------------------

#[test]
fn smoke_test_flag_runs_cycle_and_exits() {
    let dir = TempDir::new().unwrap();
    let output = phaselane(&dir).arg("--smoke-test").output().unwrap();
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["ok"], true);
    assert!(!dir.path().join(".phaselane").exists());
}

#[test]
fn smoke_test_env_var_is_honored() {
    let dir = TempDir::new().unwrap();
    phaselane(&dir)
        .env("PHASELANE_SMOKE_TEST", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ok\": true"));
}

// ---------------------------------------------------------------------------
// phaselane mcp
// ---------------------------------------------------------------------------

#[test]
fn mcp_serves_catalog_over_stdio() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let input = [
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"get_project_context","arguments":{}}}"#,
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"does_not_exist","arguments":{}}}"#,
    ]
    .join("\n");

    let output = phaselane(&dir).arg("mcp").write_stdin(input).output().unwrap();
    assert!(output.status.success());

    let responses = responses(&output.stdout);
    assert_eq!(responses.len(), 4);
    assert_eq!(by_id(&responses, 1)["result"]["serverInfo"]["name"], "phaselane");
    assert_eq!(
        by_id(&responses, 2)["result"]["tools"].as_array().unwrap().len(),
        13
    );

    let context = &by_id(&responses, 3)["result"];
    assert!(context.get("isError").is_none());
    let body: Value = serde_json::from_str(context["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(body["currentPhase"], "analyst");

    let unknown = &by_id(&responses, 4)["result"];
    assert_eq!(unknown["isError"], true);
}

#[test]
fn mcp_is_the_default_command() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let output = phaselane(&dir)
        .write_stdin(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#)
        .output()
        .unwrap();
    assert!(output.status.success());
    let responses = responses(&output.stdout);
    assert_eq!(by_id(&responses, 9)["error"]["code"], -32601);
}

#[test]
fn denied_transition_is_an_error_envelope() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let input = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"transition_phase","arguments":{"toPhase":"pm"}}}"#;

    let output = phaselane(&dir)
        .env("PHASELANE_ALLOWED_OPERATIONS", "record_decision")
        .arg("mcp")
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let responses = responses(&output.stdout);
    let result = &by_id(&responses, 1)["result"];
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("denied by policy"));
    let state = std::fs::read_to_string(dir.path().join(".phaselane/state.yaml")).unwrap();
    assert!(state.contains("phase: analyst"));
}
