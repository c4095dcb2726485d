use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, ToolContext, WorkflowTool};
use crate::checkpoint::{checkpoints, STORY_CONTEXT_VALIDATION};
use crate::error::Result;
use crate::types::LaneKey;

pub const MANUAL_TRIGGER: &str = "manual_tool";

pub struct ListCheckpointsTool;

#[async_trait]
impl WorkflowTool for ListCheckpointsTool {
    fn name(&self) -> &str {
        "list_checkpoints"
    }

    fn description(&self) -> &str {
        "List the review checkpoints that can be run"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _ctx: &ToolContext<'_>, _args: Value) -> Result<Value> {
        Ok(json!({"checkpoints": checkpoints()}))
    }
}

pub struct RunReviewCheckpointTool;

#[derive(Deserialize)]
struct RunReviewCheckpointArgs {
    #[serde(alias = "name")]
    checkpoint: String,
    #[serde(default)]
    notes: Option<String>,
}

#[async_trait]
impl WorkflowTool for RunReviewCheckpointTool {
    fn name(&self) -> &str {
        "run_review_checkpoint"
    }

    fn description(&self) -> &str {
        "Have an independent reviewer agent review a phase's deliverables"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "checkpoint": {
                    "type": "string",
                    "enum": checkpoints().iter().map(|c| c.name).collect::<Vec<_>>()
                },
                "notes": {"type": "string", "description": "Extra context for the reviewer"}
            },
            "required": ["checkpoint"]
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: RunReviewCheckpointArgs = parse_args(args)?;
        let run = ctx
            .engine
            .checkpoints()
            .run_review_checkpoint(ctx.services, &args.checkpoint, args.notes.as_deref())
            .await?;
        Ok(serde_json::to_value(&run)?)
    }
}

pub struct RunStoryContextValidationTool;

#[derive(Deserialize)]
struct RunStoryContextValidationArgs {
    #[serde(default)]
    lane: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[async_trait]
impl WorkflowTool for RunStoryContextValidationTool {
    fn name(&self) -> &str {
        "run_story_context_validation"
    }

    fn description(&self) -> &str {
        "Validate the next story's context without transitioning to dev"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lane": {"type": "string", "description": "Defaults to the configured validation lane"},
                "notes": {"type": "string"}
            }
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: RunStoryContextValidationArgs = parse_args(args)?;
        let lane = args
            .lane
            .filter(|l| !l.trim().is_empty())
            .map(LaneKey::new)
            .unwrap_or_else(|| ctx.engine.developer_lane().validation_lane);
        ctx.engine
            .policy()
            .ensure_operation_allowed(
                self.name(),
                &json!({
                    "checkpoint": STORY_CONTEXT_VALIDATION,
                    "mode": "manual",
                    "lane": lane,
                }),
            )
            .await?;
        let run = ctx
            .engine
            .checkpoints()
            .run_story_context_validation(ctx.services, &lane, MANUAL_TRIGGER, args.notes.as_deref())
            .await?;
        Ok(serde_json::to_value(&run)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhaselaneError;
    use crate::policy::{AllowAll, AllowListPolicy};
    use crate::testing::{call_tool, engine, FakeServices};
    use crate::types::DeveloperLaneConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn lists_public_registry_only() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));

        let result = call_tool(&engine, &ListCheckpointsTool, Value::Null)
            .await
            .unwrap();
        let names: Vec<&str> = result["checkpoints"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            ["pm_plan_review", "architecture_design_review", "story_scope_review"]
        );
    }

    #[tokio::test]
    async fn text_reviewer_answer_is_parsed() {
        let fakes = FakeServices::new()
            .reviewer_response(json!("{\"status\":\"approve\",\"summary\":\"ok\"}"));
        let engine = engine(&fakes, Arc::new(AllowAll));

        let result = call_tool(
            &engine,
            &RunReviewCheckpointTool,
            json!({"checkpoint": "story_scope_review"}),
        )
        .await
        .unwrap();
        assert_eq!(result["checkpoint"], "story_scope_review");
        assert_eq!(result["record"]["status"], "approve");
        assert_eq!(result["record"]["summary"], "ok");
    }

    #[tokio::test]
    async fn manual_validation_uses_configured_lane() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));
        engine.set_developer_lane(DeveloperLaneConfig {
            validate_story_context: false,
            validation_lane: LaneKey::new("strict"),
        });

        let result = call_tool(&engine, &RunStoryContextValidationTool, json!({}))
            .await
            .unwrap();
        assert_eq!(result["checkpoint"], STORY_CONTEXT_VALIDATION);
        assert_eq!(result["record"]["trigger"], MANUAL_TRIGGER);
        assert_eq!(result["record"]["lane"], "strict");
        assert!(fakes.store.state().await.transitions.is_empty());
    }

    #[tokio::test]
    async fn manual_validation_is_policy_gated() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowListPolicy::parse("run_review_checkpoint")));

        let err = call_tool(&engine, &RunStoryContextValidationTool, json!({"lane": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, PhaselaneError::PolicyViolation { .. }));
        assert!(fakes.store.state().await.reviews.is_empty());
    }
}
