//! Independent review checkpoints.
//!
//! Each checkpoint names a source phase whose deliverables are reviewed by a
//! different agent running in a freshly built, isolated execution context.
//! Reviewer output is normalized so that malformed answers still produce a
//! `revise` outcome instead of failing the checkpoint.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PhaselaneError, Result};
use crate::logger::StructuredLogger;
use crate::parser::parse_structured;
use crate::policy::PolicyGate;
use crate::services::Services;
use crate::types::{LaneKey, Phase, ReviewOutcome, ReviewStatus};

pub const STORY_CONTEXT_VALIDATION: &str = "story_context_validation";

const INVALID_JSON_SUMMARY: &str = "Reviewer response was not valid JSON.";
const UNAVAILABLE_SUMMARY: &str = "Reviewer response unavailable.";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointConfig {
    pub name: &'static str,
    pub title: &'static str,
    pub source_phase: Phase,
    pub reviewing_agent: &'static str,
    pub lane: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliverable_key_allowlist: Option<&'static [&'static str]>,
    pub instructions: &'static str,
}

static CHECKPOINTS: [CheckpointConfig; 3] = [
    CheckpointConfig {
        name: "pm_plan_review",
        title: "Product Plan Review",
        source_phase: Phase::Pm,
        reviewing_agent: "architect",
        lane: "review",
        deliverable_key_allowlist: Some(&["prd", "requirements", "scope"]),
        instructions: "Review the product plan for completeness, feasibility and testable \
acceptance criteria. Respond with JSON: {\"status\": \"approve\"|\"revise\"|\"block\", \
\"summary\": string, \"risks\": string[], \"followUp\": string[]}.",
    },
    CheckpointConfig {
        name: "architecture_design_review",
        title: "Architecture Design Review",
        source_phase: Phase::Architect,
        reviewing_agent: "qa",
        lane: "review",
        deliverable_key_allowlist: Some(&["architecture", "tech_stack", "data_model"]),
        instructions: "Review the architecture for testability, operational risk and gaps \
against the product plan. Respond with JSON: {\"status\": \"approve\"|\"revise\"|\"block\", \
\"summary\": string, \"risks\": string[], \"followUp\": string[]}.",
    },
    CheckpointConfig {
        name: "story_scope_review",
        title: "Story Scope Review",
        source_phase: Phase::Sm,
        reviewing_agent: "po",
        lane: "review",
        deliverable_key_allowlist: None,
        instructions: "Check that every story is small enough for one iteration, traces to \
the product plan and has acceptance criteria. Respond with JSON: {\"status\": \
\"approve\"|\"revise\"|\"block\", \"summary\": string, \"risks\": string[], \"followUp\": \
string[]}.",
    },
];

static STORY_CONTEXT_VALIDATION_CONFIG: CheckpointConfig = CheckpointConfig {
    name: STORY_CONTEXT_VALIDATION,
    title: "Story Context Validation",
    source_phase: Phase::Sm,
    reviewing_agent: "po",
    lane: "review",
    deliverable_key_allowlist: Some(&["stories", "story_context", "acceptance_criteria"]),
    instructions: "Before development starts, confirm the next story carries enough context \
(requirements, architecture references, acceptance criteria) to be implemented without \
guessing. Respond with JSON: {\"status\": \"approve\"|\"revise\"|\"block\", \"summary\": \
string, \"risks\": string[], \"followUp\": string[]}.",
};

/// The public checkpoint registry.
pub fn checkpoints() -> &'static [CheckpointConfig] {
    &CHECKPOINTS
}

pub fn find_checkpoint(name: &str) -> Option<&'static CheckpointConfig> {
    CHECKPOINTS.iter().find(|c| c.name == name)
}

pub fn story_context_validation_config() -> &'static CheckpointConfig {
    &STORY_CONTEXT_VALIDATION_CONFIG
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Turns whatever a reviewer returned into an object with a valid status.
pub fn normalize_review_payload(raw: &Value) -> Map<String, Value> {
    let parsed = match raw {
        Value::String(text) => match parse_structured(text) {
            Ok(v) => v,
            Err(_) => return fallback(INVALID_JSON_SUMMARY, raw),
        },
        other => other.clone(),
    };
    let Value::Object(mut map) = parsed else {
        return fallback(UNAVAILABLE_SUMMARY, raw);
    };
    let status = ReviewStatus::from_payload(map.get("status"));
    map.insert("status".to_string(), json!(status.as_str()));
    map
}

fn fallback(summary: &str, raw: &Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("status".to_string(), json!(ReviewStatus::Revise.as_str()));
    map.insert("summary".to_string(), json!(summary));
    map.insert("raw".to_string(), raw.clone());
    map
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRun {
    pub checkpoint: String,
    pub record: ReviewOutcome,
}

pub struct ReviewCheckpointRunner {
    policy: Arc<dyn PolicyGate>,
    logger: StructuredLogger,
}

impl ReviewCheckpointRunner {
    pub fn new(policy: Arc<dyn PolicyGate>, logger: StructuredLogger) -> Self {
        Self {
            policy,
            logger: logger.child(json!({"component": "review_checkpoint"})),
        }
    }

    pub async fn run_review_checkpoint(
        &self,
        services: &Services,
        name: &str,
        notes: Option<&str>,
    ) -> Result<CheckpointRun> {
        let config =
            find_checkpoint(name).ok_or_else(|| PhaselaneError::UnknownCheckpoint(name.into()))?;
        self.policy
            .ensure_operation_allowed(
                "run_review_checkpoint",
                &json!({"checkpoint": config.name, "phase": config.source_phase}),
            )
            .await?;
        self.execute(services, config, LaneKey::new(config.lane), notes, None)
            .await
    }

    /// Runs the story context validation on `lane`. The caller is
    /// responsible for the policy check, which differs between the
    /// pre-transition and manual entry points.
    pub async fn run_story_context_validation(
        &self,
        services: &Services,
        lane: &LaneKey,
        trigger: &str,
        notes: Option<&str>,
    ) -> Result<CheckpointRun> {
        self.execute(
            services,
            story_context_validation_config(),
            lane.clone(),
            notes,
            Some(trigger),
        )
        .await
    }

    async fn execute(
        &self,
        services: &Services,
        config: &CheckpointConfig,
        lane: LaneKey,
        notes: Option<&str>,
        trigger: Option<&str>,
    ) -> Result<CheckpointRun> {
        let elapsed = StructuredLogger::start_timer();

        let reviewer = services.reviewers.isolated(&lane).await?;
        let snapshot = services.store.snapshot().await?;
        let mut deliverables = services.store.deliverables(config.source_phase).await?;
        if let Some(allowed) = config.deliverable_key_allowlist {
            deliverables.retain(|key, _| allowed.contains(&key.as_str()));
        }

        let payload = json!({
            "task": config.instructions,
            "checkpoint": config.name,
            "reviewerTitle": config.title,
            "projectSnapshot": snapshot,
            "phaseDeliverables": deliverables,
            "additionalNotes": notes.unwrap_or(""),
        });
        let raw = reviewer.invoke(config.reviewing_agent, payload).await?;
        let normalized = normalize_review_payload(&raw);

        let record = ReviewOutcome {
            phase: config.source_phase,
            reviewer: config.reviewing_agent.to_string(),
            lane: lane.clone(),
            status: ReviewStatus::from_payload(normalized.get("status")),
            summary: normalized
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            risks: string_list(normalized.get("risks")),
            follow_up: string_list(
                normalized
                    .get("followUp")
                    .or_else(|| normalized.get("follow_up")),
            ),
            additional_notes: notes.filter(|n| !n.trim().is_empty()).map(str::to_string),
            trigger: trigger.map(str::to_string),
            raw_outcome: Value::Object(normalized),
            recorded_at: Utc::now(),
        };
        services
            .store
            .save_review_outcome(config.name, &record)
            .await?;

        let duration_ms = elapsed();
        self.logger.info(
            "review_checkpoint_completed",
            json!({
                "checkpoint": config.name,
                "status": record.status.as_str(),
                "reviewer": record.reviewer,
                "lane": lane.as_str(),
                "trigger": trigger,
                "durationMs": duration_ms,
            }),
        );
        let mut attributes = BTreeMap::new();
        attributes.insert("checkpoint".to_string(), config.name.to_string());
        attributes.insert("status".to_string(), record.status.as_str().to_string());
        self.logger
            .record_timing("review.checkpoint", duration_ms, attributes);

        Ok(CheckpointRun {
            checkpoint: config.name.to_string(),
            record,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
