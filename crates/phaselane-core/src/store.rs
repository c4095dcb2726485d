use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{PhaselaneError, Result};
use crate::paths;
use crate::ports::ProjectStore;
use crate::types::{
    DeveloperLaneConfig, LaneDecisionRecord, Phase, RequestContext, ReviewOutcome,
};

const MAX_CONVERSATION: usize = 500;

// ---------------------------------------------------------------------------
// Persisted shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub from: Phase,
    pub to: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub project: String,
    pub phase: Phase,
    #[serde(default)]
    pub phase_history: Vec<PhaseChange>,
    #[serde(default)]
    pub deliverables: BTreeMap<Phase, Map<String, Value>>,
    #[serde(default)]
    pub lane_decisions: Vec<LaneDecisionRecord>,
    /// Review outcomes per checkpoint name, oldest first.
    #[serde(default)]
    pub reviews: BTreeMap<String, Vec<ReviewOutcome>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_lane: Option<DeveloperLaneConfig>,
    #[serde(default)]
    pub decisions: Vec<DecisionEntry>,
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ProjectState {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: project.into(),
            phase: Phase::Analyst,
            phase_history: Vec::new(),
            deliverables: BTreeMap::new(),
            lane_decisions: Vec::new(),
            reviews: BTreeMap::new(),
            developer_lane: None,
            decisions: Vec::new(),
            conversation: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Missing state file means a fresh project in `analyst`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::state_path(root);
        if !path.exists() {
            return Ok(Self::new(""));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::state_path(root), data.as_bytes())
    }

    pub fn transition(&mut self, to: Phase, reason: Option<String>) -> Result<PhaseChange> {
        if self.phase == to {
            return Err(PhaselaneError::InvalidTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
                reason: "project is already in this phase".to_string(),
            });
        }
        let change = PhaseChange {
            from: self.phase,
            to,
            reason,
            timestamp: Utc::now(),
        };
        self.phase = to;
        self.phase_history.push(change.clone());
        Ok(change)
    }

    /// Summary handed to agents and reviewers. Deliverable bodies and raw
    /// review payloads are left out.
    pub fn snapshot(&self) -> Value {
        let deliverables: BTreeMap<&str, Vec<&String>> = self
            .deliverables
            .iter()
            .map(|(phase, items)| (phase.as_str(), items.keys().collect()))
            .collect();
        let reviews: BTreeMap<&String, &str> = self
            .reviews
            .iter()
            .filter_map(|(name, runs)| runs.last().map(|r| (name, r.status.as_str())))
            .collect();
        json!({
            "project": self.project,
            "phase": self.phase,
            "phaseHistory": self.phase_history.iter().map(|c| json!({
                "from": c.from,
                "to": c.to,
                "timestamp": c.timestamp,
            })).collect::<Vec<_>>(),
            "deliverables": deliverables,
            "laneDecisions": self.lane_decisions.len(),
            "reviews": reviews,
            "developerLane": self.developer_lane,
            "decisions": self.decisions.iter().map(|d| json!({
                "key": d.key,
                "value": d.value,
            })).collect::<Vec<_>>(),
            "lastUpdated": self.last_updated,
        })
    }
}

// ---------------------------------------------------------------------------
// FileProjectStore
// ---------------------------------------------------------------------------

/// [`ProjectStore`] backed by `.phaselane/state.yaml`.
///
/// Every mutation is a locked load, modify, atomic save cycle.
pub struct FileProjectStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Creates the state file when missing. Returns true if it was written.
    pub fn init(root: &Path, project: &str) -> Result<bool> {
        let data = serde_yaml::to_string(&ProjectState::new(project))?;
        crate::io::write_if_missing(&paths::state_path(root), data.as_bytes())
    }

    pub async fn load(&self) -> Result<ProjectState> {
        let _guard = self.lock.lock().await;
        ProjectState::load(&self.root)
    }

    async fn update<R>(&self, f: impl FnOnce(&mut ProjectState) -> Result<R>) -> Result<R> {
        let _guard = self.lock.lock().await;
        let mut state = ProjectState::load(&self.root)?;
        let out = f(&mut state)?;
        state.last_updated = Utc::now();
        state.save(&self.root)?;
        Ok(out)
    }
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    async fn snapshot(&self) -> anyhow::Result<Value> {
        Ok(self.load().await?.snapshot())
    }

    async fn current_phase(&self) -> anyhow::Result<Phase> {
        Ok(self.load().await?.phase)
    }

    async fn transition_phase(&self, to: Phase, context: &RequestContext) -> anyhow::Result<Value> {
        let reason = match context {
            RequestContext::PhaseTransition { reason, .. } => reason.clone(),
            _ => None,
        };
        let change = self.update(|state| state.transition(to, reason)).await?;
        Ok(json!({
            "from": change.from,
            "to": change.to,
            "reason": change.reason,
            "transitionedAt": change.timestamp,
        }))
    }

    async fn deliverables(&self, phase: Phase) -> anyhow::Result<Map<String, Value>> {
        Ok(self
            .load()
            .await?
            .deliverables
            .remove(&phase)
            .unwrap_or_default())
    }

    async fn save_deliverable(&self, phase: Phase, key: &str, content: Value) -> anyhow::Result<()> {
        self.update(|state| {
            state
                .deliverables
                .entry(phase)
                .or_default()
                .insert(key.to_string(), content);
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn record_lane_decision(&self, record: &LaneDecisionRecord) -> anyhow::Result<()> {
        self.update(|state| {
            state.lane_decisions.push(record.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn save_review_outcome(&self, checkpoint: &str, outcome: &ReviewOutcome) -> anyhow::Result<()> {
        self.update(|state| {
            state
                .reviews
                .entry(checkpoint.to_string())
                .or_default()
                .push(outcome.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn save_developer_lane_config(&self, config: &DeveloperLaneConfig) -> anyhow::Result<()> {
        self.update(|state| {
            state.developer_lane = Some(config.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn record_decision(&self, key: &str, value: Value, rationale: Option<&str>) -> anyhow::Result<()> {
        self.update(|state| {
            state.decisions.push(DecisionEntry {
                key: key.to_string(),
                value,
                rationale: rationale.map(str::to_string),
                recorded_at: Utc::now(),
            });
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn add_conversation(&self, role: &str, message: &str) -> anyhow::Result<()> {
        self.update(|state| {
            state.conversation.push(ConversationEntry {
                role: role.to_string(),
                message: message.to_string(),
                timestamp: Utc::now(),
            });
            if state.conversation.len() > MAX_CONVERSATION {
                let excess = state.conversation.len() - MAX_CONVERSATION;
                state.conversation.drain(..excess);
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}
