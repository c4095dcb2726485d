//! Tolerant conversion of raw agent output into usable data.
//!
//! Agents are model-backed and may answer with prose, half-formed JSON or
//! nothing at all. [`ResponseParser::adapt`] never fails: it returns
//! [`AgentResult::Empty`], parsed data, an "unparsed" sentinel carrying the
//! original text, or a structured [`ParseError`] that callers can hand back
//! to the agent as corrective guidance.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::logger::StructuredLogger;

pub const RAW_SNIPPET_LIMIT: usize = 200;
pub const MAX_CONTEXT_KEYS: usize = 12;
pub const UNSERIALIZABLE_PAYLOAD: &str = "[unserializable payload]";
pub const DEFAULT_GUIDANCE: &str = "Respond with a single JSON object that follows the agent \
response protocol. Do not wrap it in prose or return bare scalars.";

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseCause {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ParseCause {
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let name = full.rsplit("::").next().unwrap_or(full).to_string();

        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(s) = source {
            chain.push(s.to_string());
            source = s.source();
        }

        Self {
            name: Some(name),
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
            stack: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub provided: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

impl ContextMetadata {
    pub fn describe(context: Option<&Value>) -> Self {
        match context {
            Some(Value::Object(map)) => Self {
                provided: true,
                keys: Some(map.keys().take(MAX_CONTEXT_KEYS).cloned().collect()),
            },
            other => Self {
                provided: other.map(is_truthy).unwrap_or(false),
                keys: None,
            },
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Returned as data whenever an agent's output cannot be used at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseError {
    pub ok: bool,
    pub error_type: String,
    pub agent_id: String,
    pub message: String,
    pub raw_snippet: String,
    pub raw_response: Value,
    pub guidance: String,
    pub cause: ParseCause,
    pub context_metadata: ContextMetadata,
}

/// Best-effort text form of `raw`, truncated to [`RAW_SNIPPET_LIMIT`]
/// characters.
pub fn raw_snippet<R: Serialize + ?Sized>(raw: &R) -> String {
    let text = match serde_json::to_value(raw) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => UNSERIALIZABLE_PAYLOAD.to_string(),
    };
    text.chars().take(RAW_SNIPPET_LIMIT).collect()
}

pub fn build_parse_error<R: Serialize + ?Sized>(
    agent_id: &str,
    raw_response: &R,
    cause: ParseCause,
    context: Option<&Value>,
    guidance: Option<&str>,
) -> ParseError {
    ParseError {
        ok: false,
        error_type: "agent_parse_error".to_string(),
        agent_id: agent_id.to_string(),
        message: format!(
            "Agent {agent_id} returned a response that could not be used: {}",
            cause.message
        ),
        raw_snippet: raw_snippet(raw_response),
        raw_response: serde_json::to_value(raw_response)
            .unwrap_or_else(|_| Value::String(UNSERIALIZABLE_PAYLOAD.to_string())),
        guidance: guidance.unwrap_or(DEFAULT_GUIDANCE).to_string(),
        cause,
        context_metadata: ContextMetadata::describe(context),
    }
}

// ---------------------------------------------------------------------------
// AgentResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AgentResult {
    /// The agent produced no content.
    Empty,
    Data(Value),
    /// Text that was expected to be structured but was not.
    Unparsed { error: String, raw_response: String },
    ParseError(ParseError),
}

impl AgentResult {
    pub fn data(&self) -> Option<&Value> {
        match self {
            AgentResult::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<Value> {
        match self {
            AgentResult::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            AgentResult::Empty => Value::Null,
            AgentResult::Data(v) => v,
            AgentResult::Unparsed {
                error,
                raw_response,
            } => json!({"error": error, "rawResponse": raw_response}),
            AgentResult::ParseError(e) => serde_json::to_value(&e).unwrap_or(Value::Null),
        }
    }
}

/// Parses agent text as JSON, tolerating surrounding whitespace and a
/// markdown code fence.
pub fn parse_structured(text: &str) -> Result<Value, serde_json::Error> {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
            rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };
    serde_json::from_str(body)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// ResponseParser
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ResponseParser {
    logger: StructuredLogger,
}

impl ResponseParser {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }

    pub fn adapt(&self, agent_id: &str, raw: &Value, context: Option<&Value>) -> AgentResult {
        match raw {
            Value::Null => AgentResult::Empty,
            Value::String(text) => match parse_structured(text) {
                Ok(parsed) => AgentResult::Data(parsed),
                Err(e) => {
                    self.logger.warn(
                        "agent_response_parse_failed",
                        json!({
                            "agentId": agent_id,
                            "error": e.to_string(),
                            "rawSnippet": raw_snippet(text.as_str()),
                        }),
                    );
                    AgentResult::Unparsed {
                        error: format!("Failed to parse response from agent {agent_id}"),
                        raw_response: text.clone(),
                    }
                }
            },
            Value::Object(_) | Value::Array(_) => AgentResult::Data(raw.clone()),
            other => {
                let cause = ParseCause::from_message(format!(
                    "Unsupported agent response type: {}",
                    value_kind(other)
                ));
                let error = build_parse_error(agent_id, other, cause, context, None);
                self.logger.warn(
                    "agent_parse_error",
                    json!({"agentId": agent_id, "rawSnippet": error.raw_snippet}),
                );
                AgentResult::ParseError(error)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
