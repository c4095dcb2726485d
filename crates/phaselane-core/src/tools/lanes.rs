use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, ToolContext, WorkflowTool};
use crate::error::{PhaselaneError, Result};
use crate::types::{DeveloperLaneConfig, LaneContext, LaneKey, RequestContext, WorkflowRequest};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaneRequestArgs {
    #[serde(alias = "user_message", alias = "message")]
    user_message: String,
    #[serde(default)]
    context: Option<LaneContext>,
}

fn lane_request_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "userMessage": {"type": "string", "description": "The request to route"},
            "context": {
                "type": "object",
                "properties": {
                    "previousPhase": {"type": "string"},
                    "hasExistingPRD": {"type": "boolean"},
                    "metadata": {"type": "object"}
                }
            }
        },
        "required": ["userMessage"]
    })
}

/// What the policy gate sees for a lane request. The lane itself is only
/// known after classification, so the gate decides on the request.
fn policy_metadata(args: &LaneRequestArgs) -> Value {
    let context = args.context.as_ref();
    json!({
        "userMessage": args.user_message,
        "previousPhase": context.and_then(|c| c.previous_phase).map(|p| p.as_str()),
        "hasExistingPRD": context.map(|c| c.has_existing_prd).unwrap_or(false),
    })
}

/// Fills in the previous phase from the store when the caller left it out.
async fn lane_context(ctx: &ToolContext<'_>, context: Option<LaneContext>) -> Result<LaneContext> {
    let mut context = context.unwrap_or_default();
    if context.previous_phase.is_none() {
        context.previous_phase = Some(ctx.services.store.current_phase().await?);
    }
    Ok(context)
}

// ---------------------------------------------------------------------------
// select_development_lane
// ---------------------------------------------------------------------------

pub struct SelectDevelopmentLaneTool;

#[async_trait]
impl WorkflowTool for SelectDevelopmentLaneTool {
    fn name(&self) -> &str {
        "select_development_lane"
    }

    fn description(&self) -> &str {
        "Classify a request as quick or complex and record the decision"
    }

    fn schema(&self) -> Value {
        lane_request_schema()
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: LaneRequestArgs = parse_args(args)?;
        ctx.engine
            .policy()
            .ensure_operation_allowed(self.name(), &policy_metadata(&args))
            .await?;
        let context = lane_context(ctx, args.context).await?;
        let decision = ctx
            .engine
            .router()
            .select_lane(ctx.services, &args.user_message, &context)
            .await?;
        Ok(serde_json::to_value(&decision)?)
    }
}

// ---------------------------------------------------------------------------
// execute_workflow
// ---------------------------------------------------------------------------

pub struct ExecuteWorkflowTool;

#[async_trait]
impl WorkflowTool for ExecuteWorkflowTool {
    fn name(&self) -> &str {
        "execute_workflow"
    }

    fn description(&self) -> &str {
        "Select a lane for the request and run it, falling back to the complex lane when the quick lane is unavailable"
    }

    fn schema(&self) -> Value {
        lane_request_schema()
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: LaneRequestArgs = parse_args(args)?;
        ctx.engine
            .policy()
            .ensure_operation_allowed(self.name(), &policy_metadata(&args))
            .await?;
        let context = lane_context(ctx, args.context).await?;
        let router = ctx.engine.router();
        let decision = router
            .select_lane(ctx.services, &args.user_message, &context)
            .await?;

        let request = WorkflowRequest {
            user_message: args.user_message,
            phase: context.previous_phase,
            context: RequestContext::LaneSelection(context),
        };
        let outcome = router
            .execute_workflow(ctx.services, &decision, &request)
            .await?;

        let mut result = serde_json::to_value(&outcome)?;
        if let Value::Object(map) = &mut result {
            map.insert("confidence".to_string(), json!(decision.confidence));
            map.insert("decision".to_string(), serde_json::to_value(&decision)?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// get_lane_history
// ---------------------------------------------------------------------------

pub struct GetLaneHistoryTool;

#[derive(Deserialize)]
struct LaneHistoryArgs {
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl WorkflowTool for GetLaneHistoryTool {
    fn name(&self) -> &str {
        "get_lane_history"
    }

    fn description(&self) -> &str {
        "List lane decisions made by this server process and the quick lane state"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "minimum": 1, "description": "Only the most recent N decisions"}
            }
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: LaneHistoryArgs = parse_args(args)?;
        let router = ctx.engine.router();
        let mut decisions = router.history();
        let total = decisions.len();
        if let Some(limit) = args.limit {
            decisions.drain(..total.saturating_sub(limit));
        }
        Ok(json!({
            "total": total,
            "decisions": decisions,
            "quickLane": router.breaker().state(),
        }))
    }
}

// ---------------------------------------------------------------------------
// configure_developer_lane
// ---------------------------------------------------------------------------

pub struct ConfigureDeveloperLaneTool;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigureDeveloperLaneArgs {
    #[serde(default, alias = "validate_story_context")]
    validate_story_context: Option<bool>,
    #[serde(default, alias = "validation_lane")]
    validation_lane: Option<String>,
}

#[async_trait]
impl WorkflowTool for ConfigureDeveloperLaneTool {
    fn name(&self) -> &str {
        "configure_developer_lane"
    }

    fn description(&self) -> &str {
        "Toggle story context validation before dev and choose the lane that runs it"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "validateStoryContext": {"type": "boolean"},
                "validationLane": {"type": "string", "description": "Reviewer lane, defaults to review"}
            }
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: ConfigureDeveloperLaneArgs = parse_args(args)?;
        if matches!(&args.validation_lane, Some(lane) if lane.trim().is_empty()) {
            return Err(PhaselaneError::InvalidArguments(
                "validationLane must not be empty".into(),
            ));
        }
        ctx.engine
            .policy()
            .ensure_operation_allowed(
                self.name(),
                &json!({
                    "validateStoryContext": args.validate_story_context,
                    "validationLane": args.validation_lane,
                }),
            )
            .await?;

        let current = ctx.engine.developer_lane();
        let config = DeveloperLaneConfig {
            validate_story_context: args
                .validate_story_context
                .unwrap_or(current.validate_story_context),
            validation_lane: args
                .validation_lane
                .map(|lane| LaneKey::new(lane.trim()))
                .unwrap_or(current.validation_lane),
        };
        ctx.services.store.save_developer_lane_config(&config).await?;
        ctx.engine.set_developer_lane(config.clone());

        ctx.logger.info(
            "developer_lane_configured",
            json!({
                "validateStoryContext": config.validate_story_context,
                "validationLane": config.validation_lane.as_str(),
            }),
        );
        Ok(json!({"developerLane": config}))
    }
}
