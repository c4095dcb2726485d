//! One synthetic install-and-verify cycle against a throwaway root.

use phaselane_core::config::Config;
use phaselane_core::logger::MemorySink;
use phaselane_core::policy::AllowListPolicy;
use phaselane_core::store::ProjectState;
use phaselane_core::types::Phase;
use phaselane_core::{ToolDispatcher, ToolResponse};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cmd::init::scaffold;
use crate::output::print_json;
use crate::wiring::{build_dispatcher, structured_logger};

#[derive(Debug, Serialize)]
pub struct SmokeCheck {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmokeReport {
    pub ok: bool,
    pub checks: Vec<SmokeCheck>,
    pub log_records: usize,
}

/// Runs the cycle, prints the report and returns whether every check passed.
pub fn run() -> anyhow::Result<bool> {
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(smoke_cycle())?;
    print_json(&report)?;
    Ok(report.ok)
}

pub async fn smoke_cycle() -> anyhow::Result<SmokeReport> {
    let dir = tempfile::TempDir::new()?;
    let root = dir.path();
    scaffold(root)?;
    let config = Config::load(root)?;

    let sink = Arc::new(MemorySink::new());
    let logger = structured_logger(root, &config, sink.clone())?;
    let dispatcher = build_dispatcher(root, &config, Arc::new(AllowListPolicy::parse("*")), logger)?;

    let mut checks = Vec::new();

    checks.push(
        expect_success(&dispatcher, "list_checkpoints", json!({}), |body| {
            body["checkpoints"].as_array().map(Vec::len) == Some(3)
        })
        .await,
    );
    checks.push(
        expect_success(&dispatcher, "get_project_context", json!({}), |body| {
            body["currentPhase"] == "analyst"
        })
        .await,
    );
    checks.push(
        expect_success(
            &dispatcher,
            "configure_developer_lane",
            json!({"validateStoryContext": false, "validationLane": "review"}),
            |body| body["developerLane"]["validationLane"] == "review",
        )
        .await,
    );
    checks.push(
        expect_success(&dispatcher, "transition_phase", json!({"toPhase": "pm"}), |body| {
            body["to"] == "pm"
        })
        .await,
    );

    let persisted = ProjectState::load(root).map(|s| s.phase);
    checks.push(SmokeCheck {
        name: "state_persisted",
        passed: matches!(persisted, Ok(Phase::Pm)),
        detail: match persisted {
            Ok(Phase::Pm) => None,
            Ok(other) => Some(format!("phase on disk is {other}")),
            Err(e) => Some(e.to_string()),
        },
    });

    let unknown = dispatcher.dispatch("smoke_unknown_tool", json!({})).await;
    checks.push(SmokeCheck {
        name: "unknown_tool",
        passed: unknown.is_error && unknown.body().contains("unknown operation"),
        detail: (!unknown.is_error).then(|| "unknown tool did not fail".to_string()),
    });

    Ok(SmokeReport {
        ok: checks.iter().all(|c| c.passed),
        checks,
        log_records: sink.records().len(),
    })
}

async fn expect_success(
    dispatcher: &ToolDispatcher,
    name: &'static str,
    args: Value,
    verify: impl Fn(&Value) -> bool,
) -> SmokeCheck {
    let response = dispatcher.dispatch(name, args).await;
    let (passed, detail) = judge(&response, verify);
    SmokeCheck {
        name,
        passed,
        detail,
    }
}

fn judge(response: &ToolResponse, verify: impl Fn(&Value) -> bool) -> (bool, Option<String>) {
    if response.is_error {
        return (false, Some(response.body().to_string()));
    }
    match serde_json::from_str::<Value>(response.body()) {
        Ok(body) if verify(&body) => (true, None),
        Ok(_) => (false, Some("unexpected response body".to_string())),
        Err(e) => (false, Some(format!("response is not JSON: {e}"))),
    }
}
