use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{PhaselaneError, Result};
use crate::logger::StructuredLogger;
use crate::ports::{
    AgentBridge, DeliverableGenerator, LaneClassifier, LaneExecutor, PhaseClassifier,
    ProjectStore, QuickLaneFactory, ReviewerFactory,
};

/// Shared collaborator handles, constructed once per process.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ProjectStore>,
    pub agents: Arc<dyn AgentBridge>,
    pub reviewers: Arc<dyn ReviewerFactory>,
    pub deliverables: Arc<dyn DeliverableGenerator>,
    pub lane_classifier: Arc<dyn LaneClassifier>,
    pub phase_classifier: Arc<dyn PhaseClassifier>,
    pub complex_lane: Arc<dyn LaneExecutor>,
    pub quick_lane: Arc<dyn QuickLaneFactory>,
}

#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn build(&self) -> anyhow::Result<Services>;
}

/// Lazily builds [`Services`] on first use.
///
/// Concurrent first callers await the same in-flight construction. A failed
/// construction is not cached, so the next request retries.
pub struct ServiceRegistry {
    factory: Arc<dyn ServiceFactory>,
    cell: OnceCell<Services>,
    attempts: AtomicUsize,
    logger: StructuredLogger,
}

impl ServiceRegistry {
    pub fn new(factory: Arc<dyn ServiceFactory>, logger: StructuredLogger) -> Self {
        Self {
            factory,
            cell: OnceCell::new(),
            attempts: AtomicUsize::new(0),
            logger: logger.child(json!({"component": "service_registry"})),
        }
    }

    pub async fn ensure_initialized(&self) -> Result<&Services> {
        self.cell
            .get_or_try_init(|| async {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let elapsed = StructuredLogger::start_timer();
                match self.factory.build().await {
                    Ok(services) => {
                        self.logger.info(
                            "services_initialized",
                            json!({"attempt": attempt, "durationMs": elapsed()}),
                        );
                        Ok(services)
                    }
                    Err(e) => {
                        self.logger.error(
                            "services_initialization_failed",
                            json!({"attempt": attempt, "error": format!("{e:#}")}),
                        );
                        Err(PhaselaneError::ServiceInit(format!("{e:#}")))
                    }
                }
            })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Number of construction attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemorySink;
    use crate::testing::FakeServices;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct SlowFactory {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl ServiceFactory for SlowFactory {
        async fn build(&self) -> anyhow::Result<Services> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(FakeServices::new().services())
        }
    }

    struct FlakyFactory {
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl ServiceFactory for FlakyFactory {
        async fn build(&self) -> anyhow::Result<Services> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                anyhow::bail!("store locked");
            }
            Ok(FakeServices::new().services())
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_construction() {
        let factory = Arc::new(SlowFactory {
            builds: AtomicUsize::new(0),
        });
        let registry = Arc::new(ServiceRegistry::new(
            factory.clone(),
            StructuredLogger::disabled(),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.ensure_initialized().await.map(|_| ())
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert!(registry.is_initialized());
        registry.ensure_initialized().await.unwrap();
        assert_eq!(registry.attempts(), 1);
    }

    #[tokio::test]
    async fn failed_initialization_is_retried() {
        let sink = Arc::new(MemorySink::new());
        let registry = ServiceRegistry::new(
            Arc::new(FlakyFactory {
                failed_once: AtomicBool::new(false),
            }),
            StructuredLogger::new(sink.clone()),
        );

        let err = registry.ensure_initialized().await.err().unwrap();
        assert!(err.to_string().contains("store locked"));
        assert!(!registry.is_initialized());

        registry.ensure_initialized().await.unwrap();
        assert_eq!(registry.attempts(), 2);
        assert_eq!(sink.with_message("services_initialization_failed").len(), 1);
        let ok = &sink.with_message("services_initialized")[0];
        assert_eq!(ok["component"], "service_registry");
        assert_eq!(ok["attempt"], 2);
    }
}
