//! Subprocess-backed collaborators.
//!
//! Agents are external programs. Each invocation spawns the configured
//! command, writes one JSON request line to its stdin and takes whatever it
//! prints on stdout as the raw agent response.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use phaselane_core::config::{AgentsConfig, CommandConfig};
use phaselane_core::parser::ResponseParser;
use phaselane_core::ports::{
    AgentBridge, DeliverableGenerator, LaneClassifier, LaneExecutor, PhaseClassifier,
    QuickLaneFactory, ReviewerFactory,
};
use phaselane_core::types::{
    Lane, LaneContext, LaneDecision, LaneKey, Phase, RequestContext, WorkflowRequest,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const LANE_CLASSIFIER_AGENT: &str = "lane-classifier";
pub const PHASE_CLASSIFIER_AGENT: &str = "phase-classifier";
pub const DELIVERABLE_AGENT: &str = "deliverable-generator";
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";
pub const QUICK_LANE_AGENT: &str = "quick-lane";

// ---------------------------------------------------------------------------
// CommandAgentBridge
// ---------------------------------------------------------------------------

pub struct CommandAgentBridge {
    command: CommandConfig,
    lane: Option<LaneKey>,
    session: String,
    timeout: Duration,
    root: PathBuf,
}

impl CommandAgentBridge {
    pub fn new(
        command: CommandConfig,
        lane: Option<LaneKey>,
        timeout: Duration,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command,
            lane,
            session: uuid::Uuid::new_v4().to_string(),
            timeout,
            root: root.into(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn program(&self) -> anyhow::Result<&str> {
        self.command
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                anyhow!("no agent command configured (set agents.command in .phaselane/config.yaml)")
            })
    }
}

#[async_trait]
impl AgentBridge for CommandAgentBridge {
    async fn invoke(&self, agent_id: &str, payload: Value) -> anyhow::Result<Value> {
        let program = self.program()?;
        let request = json!({
            "agent": agent_id,
            "lane": self.lane,
            "session": self.session,
            "payload": payload,
        });
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        let mut cmd = Command::new(program);
        cmd.args(&self.command.args)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn agent command '{program}'"))?;

        // The request is written while the output is collected, and both
        // sit under the timeout: an agent that never drains stdin must not
        // outlive it. Dropping the child on timeout kills it.
        let stdin = child.stdin.take();
        let exchange = async move {
            let write = async move {
                if let Some(mut stdin) = stdin {
                    // Agents that ignore their input may exit before reading it.
                    if let Err(e) = stdin.write_all(&line).await {
                        if e.kind() != std::io::ErrorKind::BrokenPipe {
                            return Err(e);
                        }
                    }
                }
                Ok(())
            };
            let (written, output) = tokio::join!(write, child.wait_with_output());
            written.context("failed to write agent request")?;
            output.context("failed to wait for agent")
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                anyhow!(
                    "agent '{agent_id}' timed out after {}s",
                    self.timeout.as_secs_f64()
                )
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "agent '{agent_id}' exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(agent = agent_id, session = self.session(), bytes = stdout.len(), "agent responded");
        Ok(if stdout.is_empty() {
            Value::Null
        } else {
            Value::String(stdout)
        })
    }
}

// ---------------------------------------------------------------------------
// Reviewers
// ---------------------------------------------------------------------------

/// Hands out a new bridge, with its own session, for every review.
pub struct CommandReviewerFactory {
    agents: AgentsConfig,
    root: PathBuf,
}

impl CommandReviewerFactory {
    pub fn new(agents: AgentsConfig, root: &Path) -> Self {
        Self {
            agents,
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl ReviewerFactory for CommandReviewerFactory {
    async fn isolated(&self, lane: &LaneKey) -> anyhow::Result<Arc<dyn AgentBridge>> {
        Ok(Arc::new(CommandAgentBridge::new(
            self.agents.command_for(Some(lane)),
            Some(lane.clone()),
            Duration::from_secs(self.agents.timeout_seconds),
            &self.root,
        )))
    }
}

// ---------------------------------------------------------------------------
// Lane executors
// ---------------------------------------------------------------------------

/// Runs a workflow request through one agent.
pub struct AgentLaneExecutor {
    bridge: Arc<dyn AgentBridge>,
    agent_id: &'static str,
    parser: ResponseParser,
}

impl AgentLaneExecutor {
    pub fn new(bridge: Arc<dyn AgentBridge>, agent_id: &'static str, parser: ResponseParser) -> Self {
        Self {
            bridge,
            agent_id,
            parser,
        }
    }
}

#[async_trait]
impl LaneExecutor for AgentLaneExecutor {
    async fn execute(&self, request: &WorkflowRequest) -> anyhow::Result<Value> {
        let payload = serde_json::to_value(request)?;
        let raw = self.bridge.invoke(self.agent_id, payload.clone()).await?;
        Ok(self
            .parser
            .adapt(self.agent_id, &raw, Some(&payload))
            .into_value())
    }
}

/// Builds the quick lane executor from `quick_lane` in the config.
pub struct CommandQuickLaneFactory {
    command: CommandConfig,
    timeout: Duration,
    root: PathBuf,
    parser: ResponseParser,
}

impl CommandQuickLaneFactory {
    pub fn new(command: CommandConfig, timeout: Duration, root: &Path, parser: ResponseParser) -> Self {
        Self {
            command,
            timeout,
            root: root.to_path_buf(),
            parser,
        }
    }
}

#[async_trait]
impl QuickLaneFactory for CommandQuickLaneFactory {
    async fn build(&self) -> anyhow::Result<Arc<dyn LaneExecutor>> {
        let program = self
            .command
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("quick lane command not configured"))?;
        which::which(program)
            .map_err(|e| anyhow!("quick lane command '{program}' not found: {e}"))?;

        let bridge = CommandAgentBridge::new(
            self.command.clone(),
            Some(LaneKey::new(Lane::Quick.as_str())),
            self.timeout,
            &self.root,
        );
        Ok(Arc::new(AgentLaneExecutor::new(
            Arc::new(bridge),
            QUICK_LANE_AGENT,
            self.parser.clone(),
        )))
    }
}

// ---------------------------------------------------------------------------
// Classifiers and generator
// ---------------------------------------------------------------------------

pub struct AgentLaneClassifier {
    bridge: Arc<dyn AgentBridge>,
    parser: ResponseParser,
}

impl AgentLaneClassifier {
    pub fn new(bridge: Arc<dyn AgentBridge>, parser: ResponseParser) -> Self {
        Self { bridge, parser }
    }
}

#[async_trait]
impl LaneClassifier for AgentLaneClassifier {
    async fn classify(&self, message: &str, context: &LaneContext) -> anyhow::Result<LaneDecision> {
        let payload = json!({"userMessage": message, "context": context});
        let raw = self
            .bridge
            .invoke(LANE_CLASSIFIER_AGENT, payload.clone())
            .await?;
        let decision = self
            .parser
            .adapt(LANE_CLASSIFIER_AGENT, &raw, Some(&payload))
            .into_data()
            .and_then(|data| serde_json::from_value::<LaneDecision>(data).ok());
        Ok(decision.unwrap_or_else(|| {
            LaneDecision::new(
                Lane::Complex,
                0.0,
                "lane classifier returned no usable decision; defaulting to complex",
            )
        }))
    }
}

pub struct AgentPhaseClassifier {
    bridge: Arc<dyn AgentBridge>,
}

impl AgentPhaseClassifier {
    pub fn new(bridge: Arc<dyn AgentBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl PhaseClassifier for AgentPhaseClassifier {
    async fn detect(&self, message: &str, context: &RequestContext) -> anyhow::Result<Value> {
        self.bridge
            .invoke(
                PHASE_CLASSIFIER_AGENT,
                json!({"userMessage": message, "context": context}),
            )
            .await
    }
}

pub struct AgentDeliverableGenerator {
    bridge: Arc<dyn AgentBridge>,
}

impl AgentDeliverableGenerator {
    pub fn new(bridge: Arc<dyn AgentBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl DeliverableGenerator for AgentDeliverableGenerator {
    async fn generate(&self, kind: &str, phase: Phase, context: &RequestContext) -> anyhow::Result<Value> {
        self.bridge
            .invoke(
                DELIVERABLE_AGENT,
                json!({"deliverableType": kind, "phase": phase, "context": context}),
            )
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
