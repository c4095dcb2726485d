use serde_json::{json, Value};
use std::sync::Arc;

use crate::checkpoint::{ReviewCheckpointRunner, STORY_CONTEXT_VALIDATION};
use crate::error::Result;
use crate::logger::StructuredLogger;
use crate::policy::PolicyGate;
use crate::services::Services;
use crate::types::{DeveloperLaneConfig, Phase, RequestContext};

pub const PRE_TRANSITION_TRIGGER: &str = "phase_transition";

/// Guards phase transitions.
///
/// Transition validity is decided by the project store. The gate adds the
/// optional story context validation that must pass the policy check and run
/// before any transition into `dev`.
pub struct PhaseGate {
    policy: Arc<dyn PolicyGate>,
    logger: StructuredLogger,
}

impl PhaseGate {
    pub fn new(policy: Arc<dyn PolicyGate>, logger: StructuredLogger) -> Self {
        Self {
            policy,
            logger: logger.child(json!({"component": "phase_gate"})),
        }
    }

    pub async fn transition(
        &self,
        services: &Services,
        runner: &ReviewCheckpointRunner,
        config: &DeveloperLaneConfig,
        to: Phase,
        context: RequestContext,
    ) -> Result<Value> {
        let validation = if config.validate_story_context && to == Phase::Dev {
            self.policy
                .ensure_operation_allowed(
                    "run_story_context_validation",
                    &json!({
                        "checkpoint": STORY_CONTEXT_VALIDATION,
                        "mode": "pre_transition",
                        "lane": config.validation_lane,
                    }),
                )
                .await?;
            Some(
                runner
                    .run_story_context_validation(
                        services,
                        &config.validation_lane,
                        PRE_TRANSITION_TRIGGER,
                        None,
                    )
                    .await?,
            )
        } else {
            None
        };

        let mut result = services.store.transition_phase(to, &context).await?;

        if let (Value::Object(map), Some(run)) = (&mut result, &validation) {
            map.insert(
                "storyContextValidation".to_string(),
                serde_json::to_value(&run.record)?,
            );
        }

        self.logger.info(
            "phase_transitioned",
            json!({
                "toPhase": to.as_str(),
                "contextKind": context.kind(),
                "storyContextValidated": validation.is_some(),
                "validationStatus": validation.as_ref().map(|v| v.record.status.as_str()),
            }),
        );
        Ok(result)
    }
}
