//! Uniform tool entry point.
//!
//! [`ToolDispatcher::dispatch`] never fails: every outcome, including an
//! unknown tool name, a policy denial, a service initialization failure or a
//! panic inside the tool, comes back as a [`ToolResponse`] envelope.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{panic_message, PhaselaneError, Result};
use crate::logger::StructuredLogger;
use crate::tools::{all_tools, ToolContext, WorkflowTool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(
        rename = "isError",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_error: bool,
}

impl ToolResponse {
    fn text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text,
            }],
            is_error,
        }
    }

    pub fn success(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| format!("serialization error: {e}"));
        Self::text(text, false)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::text(message.into(), true)
    }

    /// Text of the first content block.
    pub fn body(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolOutcomeFields<'a> {
    operation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    lane: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub struct ToolDispatcher {
    engine: Arc<Engine>,
    tools: Vec<Box<dyn WorkflowTool>>,
}

impl ToolDispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_tools(engine, all_tools())
    }

    pub fn with_tools(engine: Arc<Engine>, tools: Vec<Box<dyn WorkflowTool>>) -> Self {
        Self { engine, tools }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Tool descriptors in MCP `tools/list` shape.
    pub fn tool_list(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.schema(),
                })
            })
            .collect()
    }

    pub async fn dispatch(&self, name: &str, args: Value) -> ToolResponse {
        let logger = self.engine.logger().child(json!({"operation": name}));
        let elapsed = StructuredLogger::start_timer();

        let outcome = AssertUnwindSafe(self.run(name, args, &logger))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(PhaselaneError::Panicked(panic_message(payload.as_ref())))
            });
        let duration_ms = elapsed();

        let mut attributes = BTreeMap::new();
        attributes.insert("operation".to_string(), name.to_string());

        match outcome {
            Ok(value) => {
                let fields = ToolOutcomeFields {
                    operation: name,
                    lane: value.get("lane").and_then(Value::as_str).map(str::to_string),
                    confidence: value.get("confidence").and_then(Value::as_f64),
                    duration_ms,
                    error: None,
                };
                logger.info(
                    "tool_completed",
                    serde_json::to_value(&fields).unwrap_or_default(),
                );
                attributes.insert("status".to_string(), "ok".to_string());
                logger.record_timing("tool.execution", duration_ms, attributes);
                ToolResponse::success(&value)
            }
            Err(e) => {
                let message = e.to_string();
                let fields = ToolOutcomeFields {
                    operation: name,
                    lane: None,
                    confidence: None,
                    duration_ms,
                    error: Some(message.clone()),
                };
                logger.error(
                    "tool_failed",
                    serde_json::to_value(&fields).unwrap_or_default(),
                );
                attributes.insert("status".to_string(), "error".to_string());
                logger.record_timing("tool.execution", duration_ms, attributes);
                ToolResponse::failure(message)
            }
        }
    }

    async fn run(&self, name: &str, args: Value, logger: &StructuredLogger) -> Result<Value> {
        let services = self.engine.services().await?;
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| PhaselaneError::UnknownOperation(name.to_string()))?;
        let ctx = ToolContext {
            engine: &self.engine,
            services,
            logger,
        };
        tool.call(&ctx, args).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
