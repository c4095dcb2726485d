//! Interfaces of the external collaborators the core drives.
//!
//! Implementations live outside this crate (the `phaselane` binary wires
//! subprocess-backed ones) or in tests. Collaborator failures are opaque and
//! surface as `anyhow::Error`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::types::{
    DeveloperLaneConfig, LaneContext, LaneDecision, LaneDecisionRecord, LaneKey, Phase,
    RequestContext, ReviewOutcome, WorkflowRequest,
};

/// Persistent project state.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<Value>;
    async fn current_phase(&self) -> anyhow::Result<Phase>;
    /// Validates and applies a phase transition, returning the transition
    /// record.
    async fn transition_phase(&self, to: Phase, context: &RequestContext)
        -> anyhow::Result<Value>;
    async fn deliverables(&self, phase: Phase) -> anyhow::Result<Map<String, Value>>;
    async fn save_deliverable(&self, phase: Phase, key: &str, content: Value)
        -> anyhow::Result<()>;
    async fn record_lane_decision(&self, record: &LaneDecisionRecord) -> anyhow::Result<()>;
    async fn save_review_outcome(&self, checkpoint: &str, outcome: &ReviewOutcome)
        -> anyhow::Result<()>;
    async fn save_developer_lane_config(&self, config: &DeveloperLaneConfig)
        -> anyhow::Result<()>;
    async fn record_decision(&self, key: &str, value: Value, rationale: Option<&str>)
        -> anyhow::Result<()>;
    async fn add_conversation(&self, role: &str, message: &str) -> anyhow::Result<()>;
}

/// Invokes a model-backed agent and returns its raw, unvalidated output.
#[async_trait]
pub trait AgentBridge: Send + Sync {
    async fn invoke(&self, agent_id: &str, payload: Value) -> anyhow::Result<Value>;
}

/// Builds a fresh agent bridge for a lane. Each call must return a new,
/// unshared execution context.
#[async_trait]
pub trait ReviewerFactory: Send + Sync {
    async fn isolated(&self, lane: &LaneKey) -> anyhow::Result<Arc<dyn AgentBridge>>;
}

#[async_trait]
pub trait LaneClassifier: Send + Sync {
    async fn classify(&self, message: &str, context: &LaneContext) -> anyhow::Result<LaneDecision>;
}

#[async_trait]
pub trait PhaseClassifier: Send + Sync {
    async fn detect(&self, message: &str, context: &RequestContext) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait DeliverableGenerator: Send + Sync {
    async fn generate(
        &self,
        kind: &str,
        phase: Phase,
        context: &RequestContext,
    ) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait LaneExecutor: Send + Sync {
    async fn execute(&self, request: &WorkflowRequest) -> anyhow::Result<Value>;
}

/// Constructs the quick lane's executor (its model client). A failure here
/// permanently disables the quick lane.
#[async_trait]
pub trait QuickLaneFactory: Send + Sync {
    async fn build(&self) -> anyhow::Result<Arc<dyn LaneExecutor>>;
}
