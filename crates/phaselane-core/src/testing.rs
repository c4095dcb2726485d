//! In-memory collaborators shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::engine::Engine;
use crate::error::Result;
use crate::logger::{MetricEvent, MetricSink, StructuredLogger};
use crate::policy::PolicyGate;
use crate::ports::{
    AgentBridge, DeliverableGenerator, LaneClassifier, LaneExecutor, PhaseClassifier,
    ProjectStore, QuickLaneFactory, ReviewerFactory,
};
use crate::services::{ServiceFactory, Services};
use crate::tools::{ToolContext, WorkflowTool};
use crate::types::{
    DeveloperLaneConfig, Lane, LaneContext, LaneDecision, LaneDecisionRecord, LaneKey, Phase,
    RequestContext, ReviewOutcome, WorkflowRequest,
};

/// Polls `cond` until it holds, failing the test after about two seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[derive(Default)]
pub struct RecordingMetricSink {
    events: StdMutex<Vec<MetricEvent>>,
}

impl RecordingMetricSink {
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricSink for RecordingMetricSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn record(&self, event: MetricEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MemoryState {
    pub phase: Phase,
    pub transitions: Vec<Phase>,
    pub deliverables: HashMap<Phase, Map<String, Value>>,
    pub lane_decisions: Vec<LaneDecisionRecord>,
    pub reviews: Vec<(String, ReviewOutcome)>,
    pub developer_lane: Vec<DeveloperLaneConfig>,
    pub decisions: Vec<(String, Value)>,
    pub conversation: Vec<(String, String)>,
    pub transition_result: Option<Value>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                phase: Phase::Analyst,
                transitions: Vec::new(),
                deliverables: HashMap::new(),
                lane_decisions: Vec::new(),
                reviews: Vec::new(),
                developer_lane: Vec::new(),
                decisions: Vec::new(),
                conversation: Vec::new(),
                transition_result: None,
            }),
        }
    }

    pub async fn state(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn put_deliverable(&self, phase: Phase, key: &str, content: Value) {
        self.state
            .lock()
            .await
            .deliverables
            .entry(phase)
            .or_default()
            .insert(key.to_string(), content);
    }

    pub async fn set_transition_result(&self, value: Value) {
        self.state.lock().await.transition_result = Some(value);
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn snapshot(&self) -> anyhow::Result<Value> {
        let state = self.state.lock().await;
        Ok(json!({
            "phase": state.phase,
            "transitions": state.transitions.len(),
            "laneDecisions": state.lane_decisions.len(),
        }))
    }

    async fn current_phase(&self) -> anyhow::Result<Phase> {
        Ok(self.state.lock().await.phase)
    }

    async fn transition_phase(&self, to: Phase, _context: &RequestContext) -> anyhow::Result<Value> {
        let mut state = self.state.lock().await;
        let from = state.phase;
        state.phase = to;
        state.transitions.push(to);
        Ok(state
            .transition_result
            .clone()
            .unwrap_or_else(|| json!({"from": from, "to": to})))
    }

    async fn deliverables(&self, phase: Phase) -> anyhow::Result<Map<String, Value>> {
        Ok(self
            .state
            .lock()
            .await
            .deliverables
            .get(&phase)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_deliverable(&self, phase: Phase, key: &str, content: Value) -> anyhow::Result<()> {
        self.put_deliverable(phase, key, content).await;
        Ok(())
    }

    async fn record_lane_decision(&self, record: &LaneDecisionRecord) -> anyhow::Result<()> {
        self.state.lock().await.lane_decisions.push(record.clone());
        Ok(())
    }

    async fn save_review_outcome(&self, checkpoint: &str, outcome: &ReviewOutcome) -> anyhow::Result<()> {
        self.state
            .lock()
            .await
            .reviews
            .push((checkpoint.to_string(), outcome.clone()));
        Ok(())
    }

    async fn save_developer_lane_config(&self, config: &DeveloperLaneConfig) -> anyhow::Result<()> {
        self.state.lock().await.developer_lane.push(config.clone());
        Ok(())
    }

    async fn record_decision(&self, key: &str, value: Value, _rationale: Option<&str>) -> anyhow::Result<()> {
        self.state
            .lock()
            .await
            .decisions
            .push((key.to_string(), value));
        Ok(())
    }

    async fn add_conversation(&self, role: &str, message: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .await
            .conversation
            .push((role.to_string(), message.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Agents and reviewers
// ---------------------------------------------------------------------------

pub struct ScriptedAgent {
    response: Value,
    pub calls: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl AgentBridge for ScriptedAgent {
    async fn invoke(&self, agent_id: &str, payload: Value) -> anyhow::Result<Value> {
        self.calls.lock().await.push((agent_id.to_string(), payload));
        Ok(self.response.clone())
    }
}

type ReviewCall = (String, String, Value);

pub struct ScriptedReviewers {
    response: Value,
    pub constructed: AtomicUsize,
    calls: Arc<Mutex<Vec<ReviewCall>>>,
}

impl ScriptedReviewers {
    /// `(lane, agent, payload)` for every reviewer invocation.
    pub async fn calls(&self) -> Vec<ReviewCall> {
        self.calls.lock().await.clone()
    }
}

struct ReviewerAgent {
    lane: String,
    response: Value,
    calls: Arc<Mutex<Vec<ReviewCall>>>,
}

#[async_trait]
impl AgentBridge for ReviewerAgent {
    async fn invoke(&self, agent_id: &str, payload: Value) -> anyhow::Result<Value> {
        self.calls
            .lock()
            .await
            .push((self.lane.clone(), agent_id.to_string(), payload));
        Ok(self.response.clone())
    }
}

#[async_trait]
impl ReviewerFactory for ScriptedReviewers {
    async fn isolated(&self, lane: &LaneKey) -> anyhow::Result<Arc<dyn AgentBridge>> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ReviewerAgent {
            lane: lane.as_str().to_string(),
            response: self.response.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

// ---------------------------------------------------------------------------
// Classifiers and generators
// ---------------------------------------------------------------------------

pub struct FixedLaneClassifier {
    decision: std::result::Result<LaneDecision, String>,
    contexts: Mutex<Vec<LaneContext>>,
}

impl FixedLaneClassifier {
    pub async fn contexts(&self) -> Vec<LaneContext> {
        self.contexts.lock().await.clone()
    }
}

#[async_trait]
impl LaneClassifier for FixedLaneClassifier {
    async fn classify(&self, _message: &str, context: &LaneContext) -> anyhow::Result<LaneDecision> {
        self.contexts.lock().await.push(context.clone());
        self.decision.clone().map_err(anyhow::Error::msg)
    }
}

pub struct FixedPhaseClassifier;

#[async_trait]
impl PhaseClassifier for FixedPhaseClassifier {
    async fn detect(&self, message: &str, _context: &RequestContext) -> anyhow::Result<Value> {
        Ok(json!({"phase": "pm", "confidence": 0.7, "message": message}))
    }
}

pub struct EchoGenerator;

#[async_trait]
impl DeliverableGenerator for EchoGenerator {
    async fn generate(&self, kind: &str, phase: Phase, _context: &RequestContext) -> anyhow::Result<Value> {
        Ok(json!({"kind": kind, "phase": phase, "body": format!("# {kind}")}))
    }
}

// ---------------------------------------------------------------------------
// Lane executors
// ---------------------------------------------------------------------------

pub struct RecordingExecutor {
    lane: &'static str,
    pub calls: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new(lane: &'static str) -> Self {
        Self {
            lane,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LaneExecutor for RecordingExecutor {
    async fn execute(&self, request: &WorkflowRequest) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"lane": self.lane, "message": request.user_message}))
    }
}

#[derive(Clone, Copy)]
pub enum QuickBehavior {
    Succeed,
    Fail(&'static str),
    /// Signals `started`, then waits for `release` before succeeding.
    Gated,
}

pub struct ScriptedQuickFactory {
    behavior: QuickBehavior,
    pub builds: AtomicUsize,
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl QuickLaneFactory for ScriptedQuickFactory {
    async fn build(&self) -> anyhow::Result<Arc<dyn LaneExecutor>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            QuickBehavior::Succeed => {}
            QuickBehavior::Fail(reason) => anyhow::bail!(reason),
            QuickBehavior::Gated => {
                self.started.notify_one();
                self.release.notified().await;
            }
        }
        Ok(Arc::new(RecordingExecutor::new("quick")))
    }
}

// ---------------------------------------------------------------------------
// FakeServices
// ---------------------------------------------------------------------------

pub struct FakeServices {
    pub store: Arc<MemoryStore>,
    pub agents: Arc<ScriptedAgent>,
    pub reviewers: Arc<ScriptedReviewers>,
    pub lane_classifier: Arc<FixedLaneClassifier>,
    pub complex: Arc<RecordingExecutor>,
    pub quick_factory: Arc<ScriptedQuickFactory>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            agents: Arc::new(ScriptedAgent {
                response: json!({"ok": true}),
                calls: Mutex::new(Vec::new()),
            }),
            reviewers: Arc::new(ScriptedReviewers {
                response: json!({"status": "approve", "summary": "fine"}),
                constructed: AtomicUsize::new(0),
                calls: Arc::new(Mutex::new(Vec::new())),
            }),
            lane_classifier: Arc::new(FixedLaneClassifier {
                decision: Ok(LaneDecision::new(Lane::Complex, 0.75, "multi-step change")),
                contexts: Mutex::new(Vec::new()),
            }),
            complex: Arc::new(RecordingExecutor::new("complex")),
            quick_factory: Arc::new(ScriptedQuickFactory {
                behavior: QuickBehavior::Succeed,
                builds: AtomicUsize::new(0),
                started: Notify::new(),
                release: Notify::new(),
            }),
        }
    }

    pub fn quick(mut self, behavior: QuickBehavior) -> Self {
        self.quick_factory = Arc::new(ScriptedQuickFactory {
            behavior,
            builds: AtomicUsize::new(0),
            started: Notify::new(),
            release: Notify::new(),
        });
        self
    }

    pub fn lane_decision(mut self, decision: LaneDecision) -> Self {
        self.lane_classifier = Arc::new(FixedLaneClassifier {
            decision: Ok(decision),
            contexts: Mutex::new(Vec::new()),
        });
        self
    }

    pub fn lane_classifier_fails(mut self, error: &str) -> Self {
        self.lane_classifier = Arc::new(FixedLaneClassifier {
            decision: Err(error.to_string()),
            contexts: Mutex::new(Vec::new()),
        });
        self
    }

    pub fn reviewer_response(mut self, response: Value) -> Self {
        self.reviewers = Arc::new(ScriptedReviewers {
            response,
            constructed: AtomicUsize::new(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        });
        self
    }

    pub fn services(&self) -> Services {
        Services {
            store: self.store.clone(),
            agents: self.agents.clone(),
            reviewers: self.reviewers.clone(),
            deliverables: Arc::new(EchoGenerator),
            lane_classifier: self.lane_classifier.clone(),
            phase_classifier: Arc::new(FixedPhaseClassifier),
            complex_lane: self.complex.clone(),
            quick_lane: self.quick_factory.clone(),
        }
    }
}

/// Hands out clones of a prepared [`FakeServices`] bundle.
pub struct FakeFactory {
    pub services: Services,
    pub builds: AtomicUsize,
}

impl FakeFactory {
    pub fn new(fakes: &FakeServices) -> Self {
        Self {
            services: fakes.services(),
            builds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ServiceFactory for FakeFactory {
    async fn build(&self) -> anyhow::Result<Services> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.services.clone())
    }
}

/// Allows everything and keeps each operation with the metadata it was
/// checked with.
#[derive(Default)]
pub struct RecordingPolicy {
    checks: StdMutex<Vec<(String, Value)>>,
}

impl RecordingPolicy {
    pub fn checks(&self) -> Vec<(String, Value)> {
        self.checks.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyGate for RecordingPolicy {
    async fn ensure_operation_allowed(&self, operation: &str, metadata: &Value) -> Result<()> {
        self.checks
            .lock()
            .unwrap()
            .push((operation.to_string(), metadata.clone()));
        Ok(())
    }
}

/// An engine over `fakes` with logging disabled.
pub fn engine(fakes: &FakeServices, policy: Arc<dyn PolicyGate>) -> Engine {
    Engine::builder(Arc::new(FakeFactory::new(fakes)))
        .policy(policy)
        .logger(StructuredLogger::disabled())
        .build()
}

/// Invokes a single tool directly, bypassing the dispatcher envelope.
pub async fn call_tool(engine: &Engine, tool: &dyn WorkflowTool, args: Value) -> Result<Value> {
    let services = engine.services().await?;
    let logger = engine.logger().child(json!({"operation": tool.name()}));
    let ctx = ToolContext {
        engine,
        services,
        logger: &logger,
    };
    tool.call(&ctx, args).await
}
