use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_args, ToolContext, WorkflowTool};
use crate::error::Result;
use crate::types::{Phase, RequestContext};

fn metadata_of(context: Option<Value>) -> Map<String, Value> {
    match RequestContext::opaque(context) {
        RequestContext::Opaque { metadata } => metadata,
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// get_project_context
// ---------------------------------------------------------------------------

pub struct GetProjectContextTool;

#[async_trait]
impl WorkflowTool for GetProjectContextTool {
    fn name(&self) -> &str {
        "get_project_context"
    }

    fn description(&self) -> &str {
        "Return the project snapshot, current phase, developer lane settings and quick lane state"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, ctx: &ToolContext<'_>, _args: Value) -> Result<Value> {
        let store = &ctx.services.store;
        let phase = store.current_phase().await?;
        let snapshot = store.snapshot().await?;
        Ok(json!({
            "currentPhase": phase,
            "project": snapshot,
            "developerLane": ctx.engine.developer_lane(),
            "quickLane": ctx.engine.router().breaker().state(),
        }))
    }
}

// ---------------------------------------------------------------------------
// detect_phase
// ---------------------------------------------------------------------------

pub struct DetectPhaseTool;

#[derive(Deserialize)]
struct DetectPhaseArgs {
    message: String,
    #[serde(default)]
    context: Option<Value>,
}

#[async_trait]
impl WorkflowTool for DetectPhaseTool {
    fn name(&self) -> &str {
        "detect_phase"
    }

    fn description(&self) -> &str {
        "Classify which delivery phase a user message belongs to"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "User message to classify"},
                "context": {"type": "object", "description": "Optional free-form context"}
            },
            "required": ["message"]
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: DetectPhaseArgs = parse_args(args)?;
        let context = RequestContext::opaque(args.context.clone());
        let raw = ctx
            .services
            .phase_classifier
            .detect(&args.message, &context)
            .await?;
        Ok(ctx
            .engine
            .parser()
            .adapt("phase-classifier", &raw, args.context.as_ref())
            .into_value())
    }
}

// ---------------------------------------------------------------------------
// transition_phase
// ---------------------------------------------------------------------------

pub struct TransitionPhaseTool;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionPhaseArgs {
    #[serde(alias = "to_phase", alias = "phase")]
    to_phase: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    context: Option<Value>,
}

#[async_trait]
impl WorkflowTool for TransitionPhaseTool {
    fn name(&self) -> &str {
        "transition_phase"
    }

    fn description(&self) -> &str {
        "Move the project to another phase, validating story context first when entering dev is guarded"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "toPhase": {
                    "type": "string",
                    "enum": Phase::all().iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                    "description": "Target phase"
                },
                "reason": {"type": "string"},
                "context": {"type": "object"}
            },
            "required": ["toPhase"]
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: TransitionPhaseArgs = parse_args(args)?;
        let to: Phase = args.to_phase.parse()?;
        ctx.engine
            .policy()
            .ensure_operation_allowed(self.name(), &json!({"toPhase": to}))
            .await?;

        let from = ctx.services.store.current_phase().await?;
        let context = RequestContext::PhaseTransition {
            from: Some(from),
            reason: args.reason,
            metadata: metadata_of(args.context),
        };
        ctx.engine
            .phase_gate()
            .transition(
                ctx.services,
                ctx.engine.checkpoints(),
                &ctx.engine.developer_lane(),
                to,
                context,
            )
            .await
    }
}

// ---------------------------------------------------------------------------
// generate_deliverable
// ---------------------------------------------------------------------------

pub struct GenerateDeliverableTool;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateDeliverableArgs {
    #[serde(alias = "deliverable_type", alias = "type")]
    deliverable_type: String,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    context: Option<Value>,
}

#[async_trait]
impl WorkflowTool for GenerateDeliverableTool {
    fn name(&self) -> &str {
        "generate_deliverable"
    }

    fn description(&self) -> &str {
        "Generate a deliverable (prd, architecture, stories...) and store it under its phase"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "deliverableType": {"type": "string", "description": "Deliverable key, e.g. prd"},
                "phase": {"type": "string", "description": "Defaults to the current phase"},
                "context": {"type": "object"}
            },
            "required": ["deliverableType"]
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: GenerateDeliverableArgs = parse_args(args)?;
        let phase = match args.phase.as_deref() {
            Some(p) => p.parse::<Phase>()?,
            None => ctx.services.store.current_phase().await?,
        };
        ctx.engine
            .policy()
            .ensure_operation_allowed(
                self.name(),
                &json!({"deliverableType": args.deliverable_type, "phase": phase}),
            )
            .await?;

        let raw_context = args.context.clone();
        let context = RequestContext::Deliverable {
            deliverable_type: args.deliverable_type.clone(),
            metadata: metadata_of(args.context),
        };
        let raw = ctx
            .services
            .deliverables
            .generate(&args.deliverable_type, phase, &context)
            .await?;
        let content = ctx
            .engine
            .parser()
            .adapt("deliverable-generator", &raw, raw_context.as_ref())
            .into_value();
        ctx.services
            .store
            .save_deliverable(phase, &args.deliverable_type, content.clone())
            .await?;

        ctx.logger.info(
            "deliverable_saved",
            json!({"phase": phase.as_str(), "deliverableType": args.deliverable_type}),
        );
        Ok(json!({
            "phase": phase,
            "deliverableType": args.deliverable_type,
            "content": content,
        }))
    }
}

// ---------------------------------------------------------------------------
// record_decision
// ---------------------------------------------------------------------------

pub struct RecordDecisionTool;

#[derive(Deserialize)]
struct RecordDecisionArgs {
    key: String,
    value: Value,
    #[serde(default)]
    rationale: Option<String>,
}

#[async_trait]
impl WorkflowTool for RecordDecisionTool {
    fn name(&self) -> &str {
        "record_decision"
    }

    fn description(&self) -> &str {
        "Record a project decision with an optional rationale"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {"type": "string"},
                "value": {"description": "Any JSON value"},
                "rationale": {"type": "string"}
            },
            "required": ["key", "value"]
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: RecordDecisionArgs = parse_args(args)?;
        ctx.engine
            .policy()
            .ensure_operation_allowed(self.name(), &json!({"key": args.key}))
            .await?;
        ctx.services
            .store
            .record_decision(&args.key, args.value, args.rationale.as_deref())
            .await?;
        Ok(json!({"recorded": true, "key": args.key}))
    }
}

// ---------------------------------------------------------------------------
// add_conversation
// ---------------------------------------------------------------------------

pub struct AddConversationTool;

#[derive(Deserialize)]
struct AddConversationArgs {
    #[serde(default = "default_role")]
    role: String,
    message: String,
}

fn default_role() -> String {
    "user".to_string()
}

#[async_trait]
impl WorkflowTool for AddConversationTool {
    fn name(&self) -> &str {
        "add_conversation"
    }

    fn description(&self) -> &str {
        "Append a message to the project conversation log"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "role": {"type": "string", "description": "Speaker, defaults to user"},
                "message": {"type": "string"}
            },
            "required": ["message"]
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value> {
        let args: AddConversationArgs = parse_args(args)?;
        ctx.engine
            .policy()
            .ensure_operation_allowed(self.name(), &json!({"role": args.role}))
            .await?;
        ctx.services
            .store
            .add_conversation(&args.role, &args.message)
            .await?;
        Ok(json!({"recorded": true, "role": args.role}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhaselaneError;
    use crate::policy::{AllowAll, AllowListPolicy};
    use crate::testing::{call_tool, engine, FakeServices};
    use std::sync::Arc;

    #[tokio::test]
    async fn project_context_reports_phase_and_lane_state() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));

        let ctx = call_tool(&engine, &GetProjectContextTool, json!({}))
            .await
            .unwrap();
        assert_eq!(ctx["currentPhase"], "analyst");
        assert_eq!(ctx["quickLane"]["state"], "enabled");
        assert_eq!(ctx["developerLane"]["validateStoryContext"], false);
        assert_eq!(ctx["developerLane"]["validationLane"], "review");
    }

    #[tokio::test]
    async fn detect_phase_returns_classifier_data() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));

        let result = call_tool(&engine, &DetectPhaseTool, json!({"message": "write the prd"}))
            .await
            .unwrap();
        assert_eq!(result["phase"], "pm");
        assert_eq!(result["message"], "write the prd");
    }

    #[tokio::test]
    async fn transition_rejects_unknown_phase_before_acting() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));

        let err = call_tool(&engine, &TransitionPhaseTool, json!({"toPhase": "deploy"}))
            .await
            .unwrap_err();
        assert!(matches!(err, PhaselaneError::InvalidPhase(_)));
        assert!(fakes.store.state().await.transitions.is_empty());
    }

    #[tokio::test]
    async fn transition_is_gated_by_its_own_name() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowListPolicy::parse("record_decision")));

        let err = call_tool(&engine, &TransitionPhaseTool, json!({"toPhase": "pm"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transition_phase"));
        assert!(fakes.store.state().await.transitions.is_empty());
    }

    #[tokio::test]
    async fn transition_passes_through_store_result() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));

        let result = call_tool(
            &engine,
            &TransitionPhaseTool,
            json!({"toPhase": "PM", "reason": "brief approved"}),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"from": "analyst", "to": "pm"}));
    }

    #[tokio::test]
    async fn generated_deliverable_is_stored_under_current_phase() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));

        let result = call_tool(
            &engine,
            &GenerateDeliverableTool,
            json!({"deliverableType": "project_brief"}),
        )
        .await
        .unwrap();
        assert_eq!(result["phase"], "analyst");
        assert_eq!(result["content"]["kind"], "project_brief");

        let state = fakes.store.state().await;
        assert_eq!(
            state.deliverables[&Phase::Analyst]["project_brief"]["body"],
            "# project_brief"
        );
    }

    #[tokio::test]
    async fn denied_decision_is_not_recorded() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowListPolicy::parse("add_conversation")));

        let err = call_tool(
            &engine,
            &RecordDecisionTool,
            json!({"key": "database", "value": "postgres"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PhaselaneError::PolicyViolation { .. }));
        assert!(fakes.store.state().await.decisions.is_empty());

        call_tool(&engine, &AddConversationTool, json!({"message": "hello"}))
            .await
            .unwrap();
        assert_eq!(
            fakes.store.state().await.conversation,
            vec![("user".to_string(), "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid_arguments() {
        let fakes = FakeServices::new();
        let engine = engine(&fakes, Arc::new(AllowAll));

        let err = call_tool(&engine, &RecordDecisionTool, json!({"key": "db"}))
            .await
            .unwrap_err();
        assert!(matches!(err, PhaselaneError::InvalidArguments(_)));
    }
}
