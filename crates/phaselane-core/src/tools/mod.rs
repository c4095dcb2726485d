use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::engine::Engine;
use crate::error::{PhaselaneError, Result};
use crate::logger::StructuredLogger;
use crate::services::Services;

pub mod checkpoints;
pub mod lanes;
pub mod project;

/// Everything a tool needs for one invocation.
pub struct ToolContext<'a> {
    pub engine: &'a Engine,
    pub services: &'a Services,
    /// Child logger tagged with the operation name.
    pub logger: &'a StructuredLogger,
}

#[async_trait]
pub trait WorkflowTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn call(&self, ctx: &ToolContext<'_>, args: Value) -> Result<Value>;
}

pub fn all_tools() -> Vec<Box<dyn WorkflowTool>> {
    vec![
        Box::new(project::GetProjectContextTool),
        Box::new(project::DetectPhaseTool),
        Box::new(project::TransitionPhaseTool),
        Box::new(project::GenerateDeliverableTool),
        Box::new(project::RecordDecisionTool),
        Box::new(project::AddConversationTool),
        Box::new(lanes::SelectDevelopmentLaneTool),
        Box::new(lanes::ExecuteWorkflowTool),
        Box::new(lanes::GetLaneHistoryTool),
        Box::new(lanes::ConfigureDeveloperLaneTool),
        Box::new(checkpoints::ListCheckpointsTool),
        Box::new(checkpoints::RunReviewCheckpointTool),
        Box::new(checkpoints::RunStoryContextValidationTool),
    ]
}

/// Decodes tool arguments. A missing argument object decodes as `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(args).map_err(|e| PhaselaneError::InvalidArguments(e.to_string()))
}
