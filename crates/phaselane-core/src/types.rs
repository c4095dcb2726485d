use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyst,
    Pm,
    Architect,
    Sm,
    Dev,
    Qa,
    Ux,
    Po,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Analyst,
            Phase::Pm,
            Phase::Architect,
            Phase::Sm,
            Phase::Dev,
            Phase::Qa,
            Phase::Ux,
            Phase::Po,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Analyst => "analyst",
            Phase::Pm => "pm",
            Phase::Architect => "architect",
            Phase::Sm => "sm",
            Phase::Dev => "dev",
            Phase::Qa => "qa",
            Phase::Ux => "ux",
            Phase::Po => "po",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::PhaselaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::all()
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::error::PhaselaneError::InvalidPhase(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Lane
// ---------------------------------------------------------------------------

/// Execution strategy chosen for a workflow request.
///
/// Classifiers may return lane names this server does not know; those are
/// kept verbatim in `Other` and always execute on the complex lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Lane {
    Quick,
    Complex,
    Other(String),
}

impl Lane {
    pub fn as_str(&self) -> &str {
        match self {
            Lane::Quick => "quick",
            Lane::Complex => "complex",
            Lane::Other(s) => s,
        }
    }
}

impl From<String> for Lane {
    fn from(s: String) -> Self {
        match s.as_str() {
            "quick" => Lane::Quick,
            "complex" => Lane::Complex,
            _ => Lane::Other(s),
        }
    }
}

impl From<&str> for Lane {
    fn from(s: &str) -> Self {
        Lane::from(s.to_string())
    }
}

impl From<Lane> for String {
    fn from(lane: Lane) -> Self {
        lane.as_str().to_string()
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names an isolated execution context (model client profile) for agents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneKey(String);

impl LaneKey {
    pub fn new(key: impl Into<String>) -> Self {
        LaneKey(key.into())
    }

    pub fn review() -> Self {
        LaneKey::new("review")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LaneKey {
    fn default() -> Self {
        LaneKey::review()
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LaneKey {
    fn from(s: &str) -> Self {
        LaneKey::new(s)
    }
}

// ---------------------------------------------------------------------------
// LaneDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDecision {
    pub lane: Lane,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_signals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_rationale: Option<String>,
}

impl LaneDecision {
    pub fn new(lane: Lane, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            lane,
            confidence,
            rationale: rationale.into(),
            scale_level: None,
            scale_score: None,
            scale_signals: None,
            level_rationale: None,
        }
    }
}

/// A lane decision as it is appended to the audit ledger and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDecisionRecord {
    #[serde(flatten)]
    pub decision: LaneDecision,
    pub user_message: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DeveloperLaneConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperLaneConfig {
    #[serde(default, alias = "validate_story_context")]
    pub validate_story_context: bool,
    #[serde(default, alias = "validation_lane")]
    pub validation_lane: LaneKey,
}

impl Default for DeveloperLaneConfig {
    fn default() -> Self {
        Self {
            validate_story_context: false,
            validation_lane: LaneKey::review(),
        }
    }
}

// ---------------------------------------------------------------------------
// Review outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approve,
    Revise,
    Block,
}

impl ReviewStatus {
    /// Reads a reviewer-supplied status; anything unrecognized is `Revise`.
    pub fn from_payload(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str).map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("approve") => ReviewStatus::Approve,
            Some(s) if s.eq_ignore_ascii_case("block") => ReviewStatus::Block,
            _ => ReviewStatus::Revise,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Approve => "approve",
            ReviewStatus::Revise => "revise",
            ReviewStatus::Block => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub phase: Phase,
    pub reviewer: String,
    pub lane: LaneKey,
    pub status: ReviewStatus,
    pub summary: String,
    pub risks: Vec<String>,
    pub follow_up: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    pub raw_outcome: Value,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneContext {
    #[serde(default)]
    pub previous_phase: Option<Phase>,
    #[serde(default, rename = "hasExistingPRD", alias = "hasExistingPrd")]
    pub has_existing_prd: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Context handed between layers, one variant per known operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestContext {
    LaneSelection(LaneContext),
    PhaseTransition {
        #[serde(default)]
        from: Option<Phase>,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Deliverable {
        deliverable_type: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Forward-compatible bag for callers that send context this server
    /// does not interpret.
    Opaque {
        #[serde(default)]
        metadata: Map<String, Value>,
    },
}

impl RequestContext {
    /// Wraps a free-form tool argument. Non-object values are kept under
    /// a `value` key.
    pub fn opaque(value: Option<Value>) -> Self {
        let metadata = match value {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        RequestContext::Opaque { metadata }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RequestContext::LaneSelection(_) => "lane_selection",
            RequestContext::PhaseTransition { .. } => "phase_transition",
            RequestContext::Deliverable { .. } => "deliverable",
            RequestContext::Opaque { .. } => "opaque",
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        RequestContext::Opaque {
            metadata: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub user_message: String,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub context: RequestContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    /// Lane the classifier asked for.
    pub lane: Lane,
    /// Lane that actually ran.
    pub executed_lane: Lane,
    pub quick_lane_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_lane_disabled_reason: Option<String>,
    pub result: Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
