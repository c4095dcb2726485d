use serde_json::json;
use std::sync::{Arc, RwLock};

use crate::checkpoint::ReviewCheckpointRunner;
use crate::error::Result;
use crate::ledger::{DecisionLedger, InMemoryLedger};
use crate::logger::StructuredLogger;
use crate::parser::ResponseParser;
use crate::phase_gate::PhaseGate;
use crate::policy::{AllowAll, PolicyGate};
use crate::router::LaneRouter;
use crate::services::{ServiceFactory, ServiceRegistry, Services};
use crate::types::DeveloperLaneConfig;

/// Process-wide orchestrator state shared by every tool invocation.
pub struct Engine {
    registry: ServiceRegistry,
    policy: Arc<dyn PolicyGate>,
    router: LaneRouter,
    runner: ReviewCheckpointRunner,
    phase_gate: PhaseGate,
    parser: ResponseParser,
    developer_lane: RwLock<DeveloperLaneConfig>,
    logger: StructuredLogger,
}

pub struct EngineBuilder {
    factory: Arc<dyn ServiceFactory>,
    policy: Arc<dyn PolicyGate>,
    ledger: Arc<dyn DecisionLedger>,
    developer_lane: DeveloperLaneConfig,
    logger: StructuredLogger,
}

impl EngineBuilder {
    pub fn policy(mut self, policy: Arc<dyn PolicyGate>) -> Self {
        self.policy = policy;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn DecisionLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn developer_lane(mut self, config: DeveloperLaneConfig) -> Self {
        self.developer_lane = config;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Engine {
        let logger = self.logger;
        Engine {
            registry: ServiceRegistry::new(self.factory, logger.clone()),
            router: LaneRouter::new(self.ledger, logger.clone()),
            runner: ReviewCheckpointRunner::new(self.policy.clone(), logger.clone()),
            phase_gate: PhaseGate::new(self.policy.clone(), logger.clone()),
            parser: ResponseParser::new(logger.child(json!({"component": "response_parser"}))),
            policy: self.policy,
            developer_lane: RwLock::new(self.developer_lane),
            logger,
        }
    }
}

impl Engine {
    /// Starts an engine with an allow-all policy, an in-memory ledger and
    /// the default developer lane config.
    pub fn builder(factory: Arc<dyn ServiceFactory>) -> EngineBuilder {
        EngineBuilder {
            factory,
            policy: Arc::new(AllowAll),
            ledger: Arc::new(InMemoryLedger::new()),
            developer_lane: DeveloperLaneConfig::default(),
            logger: StructuredLogger::stderr(),
        }
    }

    pub async fn services(&self) -> Result<&Services> {
        self.registry.ensure_initialized().await
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &dyn PolicyGate {
        self.policy.as_ref()
    }

    pub fn router(&self) -> &LaneRouter {
        &self.router
    }

    pub fn checkpoints(&self) -> &ReviewCheckpointRunner {
        &self.runner
    }

    pub fn phase_gate(&self) -> &PhaseGate {
        &self.phase_gate
    }

    pub fn parser(&self) -> &ResponseParser {
        &self.parser
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn developer_lane(&self) -> DeveloperLaneConfig {
        self.developer_lane
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_developer_lane(&self, config: DeveloperLaneConfig) {
        *self
            .developer_lane
            .write()
            .unwrap_or_else(|e| e.into_inner()) = config;
    }
}
