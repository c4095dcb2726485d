use async_trait::async_trait;
use phaselane_core::config::Config;
use phaselane_core::logger::{JsonlMetricSink, LogLevel, LogMetricSink, RecordSink};
use phaselane_core::parser::ResponseParser;
use phaselane_core::policy::PolicyGate;
use phaselane_core::services::{ServiceFactory, Services};
use phaselane_core::store::{FileProjectStore, ProjectState};
use phaselane_core::types::{Lane, LaneKey};
use phaselane_core::{paths, Engine, PhaselaneError, StructuredLogger, ToolDispatcher};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{
    AgentDeliverableGenerator, AgentLaneClassifier, AgentLaneExecutor, AgentPhaseClassifier,
    CommandAgentBridge, CommandQuickLaneFactory, CommandReviewerFactory, ORCHESTRATOR_AGENT,
};

/// Builds the production collaborators for a project root.
pub struct DefaultServiceFactory {
    root: PathBuf,
    config: Config,
    logger: StructuredLogger,
}

impl DefaultServiceFactory {
    pub fn new(root: &Path, config: Config, logger: StructuredLogger) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            logger,
        }
    }
}

#[async_trait]
impl ServiceFactory for DefaultServiceFactory {
    async fn build(&self) -> anyhow::Result<Services> {
        if !paths::phaselane_dir(&self.root).is_dir() {
            return Err(PhaselaneError::NotInitialized.into());
        }
        // Fail here, not on the first tool that touches the store.
        ProjectState::load(&self.root)?;

        let agents = &self.config.agents;
        let timeout = Duration::from_secs(agents.timeout_seconds);
        let parser = ResponseParser::new(self.logger.child(json!({"component": "agent_bridge"})));

        let shared: Arc<CommandAgentBridge> = Arc::new(CommandAgentBridge::new(
            agents.command_for(None),
            None,
            timeout,
            &self.root,
        ));
        let complex_key = LaneKey::new(Lane::Complex.as_str());
        let complex_bridge = Arc::new(CommandAgentBridge::new(
            agents.command_for(Some(&complex_key)),
            Some(complex_key),
            timeout,
            &self.root,
        ));

        Ok(Services {
            store: Arc::new(FileProjectStore::new(&self.root)),
            agents: shared.clone(),
            reviewers: Arc::new(CommandReviewerFactory::new(agents.clone(), &self.root)),
            deliverables: Arc::new(AgentDeliverableGenerator::new(shared.clone())),
            lane_classifier: Arc::new(AgentLaneClassifier::new(shared.clone(), parser.clone())),
            phase_classifier: Arc::new(AgentPhaseClassifier::new(shared)),
            complex_lane: Arc::new(AgentLaneExecutor::new(
                complex_bridge,
                ORCHESTRATOR_AGENT,
                parser.clone(),
            )),
            quick_lane: Arc::new(CommandQuickLaneFactory::new(
                self.config.quick_lane.clone(),
                timeout,
                &self.root,
                parser,
            )),
        })
    }
}

/// The structured logger configured by the `logging` section.
///
/// Metrics are mirrored into the log stream only at debug level.
pub fn structured_logger(
    root: &Path,
    config: &Config,
    sink: Arc<dyn RecordSink>,
) -> anyhow::Result<StructuredLogger> {
    let level = config.log_level()?;
    let mut builder = StructuredLogger::builder(sink.clone())
        .min_level(level)
        .base_fields(json!({"service": "phaselane"}));
    if level == LogLevel::Debug {
        builder = builder.metric_sink(Arc::new(LogMetricSink::new(sink)));
    }
    if let Some(path) = config.metrics_file(root) {
        builder = builder.metric_sink(Arc::new(JsonlMetricSink::new(path)));
    }
    Ok(builder.build())
}

pub fn build_dispatcher(
    root: &Path,
    config: &Config,
    policy: Arc<dyn PolicyGate>,
    logger: StructuredLogger,
) -> anyhow::Result<ToolDispatcher> {
    // A lane configured through the tool outlives config.yaml edits.
    let developer_lane = ProjectState::load(root)
        .ok()
        .and_then(|s| s.developer_lane)
        .unwrap_or_else(|| config.developer_lane());

    let factory = DefaultServiceFactory::new(root, config.clone(), logger.clone());
    let engine = Engine::builder(Arc::new(factory))
        .policy(policy)
        .developer_lane(developer_lane)
        .logger(logger)
        .build();
    Ok(ToolDispatcher::new(Arc::new(engine)))
}
