//! Lane selection and execution.
//!
//! [`LaneRouter::select_lane`] asks the classifier for a [`LaneDecision`] and
//! audits it. [`LaneRouter::execute_workflow`] then runs the request on the
//! quick lane only when the decision asks for it, the breaker is still
//! enabled and the quick executor can be built; every other case runs on the
//! complex lane.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::breaker::QuickLaneBreaker;
use crate::error::Result;
use crate::ledger::DecisionLedger;
use crate::logger::{MetricEvent, MetricKind, StructuredLogger};
use crate::ports::LaneExecutor;
use crate::services::Services;
use crate::types::{Lane, LaneContext, LaneDecision, LaneDecisionRecord, WorkflowOutcome, WorkflowRequest};

pub struct LaneRouter {
    breaker: QuickLaneBreaker,
    ledger: Arc<dyn DecisionLedger>,
    quick_executor: Mutex<Option<Arc<dyn LaneExecutor>>>,
    logger: StructuredLogger,
}

impl LaneRouter {
    pub fn new(ledger: Arc<dyn DecisionLedger>, logger: StructuredLogger) -> Self {
        Self {
            breaker: QuickLaneBreaker::new(),
            ledger,
            quick_executor: Mutex::new(None),
            logger: logger.child(json!({"component": "lane_router"})),
        }
    }

    pub fn breaker(&self) -> &QuickLaneBreaker {
        &self.breaker
    }

    pub fn history(&self) -> Vec<LaneDecisionRecord> {
        self.ledger.entries()
    }

    pub async fn select_lane(
        &self,
        services: &Services,
        message: &str,
        context: &LaneContext,
    ) -> Result<LaneDecision> {
        let elapsed = StructuredLogger::start_timer();
        let decision = services.lane_classifier.classify(message, context).await?;

        let record = LaneDecisionRecord {
            decision: decision.clone(),
            user_message: message.to_string(),
            recorded_at: Utc::now(),
        };
        self.ledger.append(record.clone());
        services.store.record_lane_decision(&record).await?;

        let duration_ms = elapsed();
        self.logger.info(
            "lane_selected",
            json!({
                "lane": decision.lane.as_str(),
                "confidence": decision.confidence,
                "rationale": decision.rationale,
                "scaleLevel": decision.scale_level,
                "previousPhase": context.previous_phase.map(|p| p.as_str()),
                "durationMs": duration_ms,
            }),
        );
        let mut attributes = BTreeMap::new();
        attributes.insert("lane".to_string(), decision.lane.to_string());
        attributes.insert("confidence".to_string(), format!("{:.2}", decision.confidence));
        self.logger
            .record_timing("lane.selection", duration_ms, attributes);

        Ok(decision)
    }

    /// Returns the quick lane executor, building it on first use.
    ///
    /// Concurrent first callers share one build. A build failure trips the
    /// breaker. A build that completes after the breaker was tripped
    /// elsewhere is discarded rather than published.
    pub async fn quick_lane_executor(&self, services: &Services) -> Option<Arc<dyn LaneExecutor>> {
        if !self.breaker.is_enabled() {
            return None;
        }
        // Held across the build; waiters see its outcome.
        let mut slot = self.quick_executor.lock().await;
        if !self.breaker.is_enabled() {
            return None;
        }
        if let Some(executor) = slot.as_ref() {
            return Some(Arc::clone(executor));
        }

        match services.quick_lane.build().await {
            Ok(executor) => {
                if !self.breaker.is_enabled() {
                    self.logger.info(
                        "quick_lane_executor_discarded",
                        json!({"reason": self.breaker.disabled_reason()}),
                    );
                    return None;
                }
                *slot = Some(Arc::clone(&executor));
                Some(executor)
            }
            Err(e) => {
                let reason = e.to_string();
                if self.breaker.trip(reason.clone()) {
                    self.logger.warn(
                        "quick_lane_disabled",
                        json!({"reason": reason, "error": format!("{e:#}")}),
                    );
                    self.logger.record_metric(
                        MetricEvent::new("quick_lane.disabled", MetricKind::Counter, 1.0)
                            .with_attribute("reason", reason),
                    );
                }
                None
            }
        }
    }

    pub async fn execute_workflow(
        &self,
        services: &Services,
        decision: &LaneDecision,
        request: &WorkflowRequest,
    ) -> Result<WorkflowOutcome> {
        let quick = if decision.lane == Lane::Quick {
            self.quick_lane_executor(services).await
        } else {
            None
        };

        let (executed_lane, result) = match quick {
            Some(executor) => (Lane::Quick, executor.execute(request).await?),
            None => {
                if decision.lane == Lane::Quick {
                    self.logger.info(
                        "quick_lane_execution_skipped",
                        json!({
                            "reason": self.breaker.disabled_reason(),
                            "fallbackLane": Lane::Complex.as_str(),
                        }),
                    );
                }
                (Lane::Complex, services.complex_lane.execute(request).await?)
            }
        };

        let outcome = WorkflowOutcome {
            lane: decision.lane.clone(),
            executed_lane,
            quick_lane_available: self.breaker.is_enabled(),
            quick_lane_disabled_reason: self.breaker.disabled_reason(),
            result,
        };
        self.logger.info(
            "workflow_executed",
            json!({
                "lane": outcome.lane.as_str(),
                "executedLane": outcome.executed_lane.as_str(),
                "confidence": decision.confidence,
                "quickLaneAvailable": outcome.quick_lane_available,
            }),
        );
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
