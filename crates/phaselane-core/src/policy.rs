use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::{PhaselaneError, Result};

pub const ALLOWED_OPERATIONS_ENV: &str = "PHASELANE_ALLOWED_OPERATIONS";

/// Pre-action authorization hook.
///
/// Every mutating or externally visible operation awaits this before it
/// touches anything. Rejection is an `Err(PolicyViolation)`; success has no
/// side effects.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn ensure_operation_allowed(&self, operation: &str, metadata: &Value) -> Result<()>;
}

/// Default gate: allows everything.
pub struct AllowAll;

#[async_trait]
impl PolicyGate for AllowAll {
    async fn ensure_operation_allowed(&self, _operation: &str, _metadata: &Value) -> Result<()> {
        Ok(())
    }
}

/// Allows operations whose names appear in a case-insensitive allow set.
/// A `*` entry allows everything.
#[derive(Debug, Clone)]
pub struct AllowListPolicy {
    allowed: BTreeSet<String>,
}

impl AllowListPolicy {
    pub fn new<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: operations
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Parses a comma-separated list such as `"transition_phase, *"`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Reads [`ALLOWED_OPERATIONS_ENV`]; `None` when unset.
    pub fn from_env() -> Option<Self> {
        std::env::var(ALLOWED_OPERATIONS_ENV)
            .ok()
            .map(|v| Self::parse(&v))
    }

    pub fn allows(&self, operation: &str) -> bool {
        self.allowed.contains("*") || self.allowed.contains(&operation.to_ascii_lowercase())
    }
}

#[async_trait]
impl PolicyGate for AllowListPolicy {
    async fn ensure_operation_allowed(&self, operation: &str, _metadata: &Value) -> Result<()> {
        if self.allows(operation) {
            Ok(())
        } else {
            Err(PhaselaneError::policy(
                operation,
                "operation is not in the allowed operations list",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_never_rejects() {
        AllowAll
            .ensure_operation_allowed("anything", &Value::Null)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn allow_list_matches_case_insensitively() {
        let policy = AllowListPolicy::parse("Transition_Phase, run_review_checkpoint");
        policy
            .ensure_operation_allowed("TRANSITION_PHASE", &Value::Null)
            .await
            .unwrap();
        let err = policy
            .ensure_operation_allowed("execute_workflow", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PhaselaneError::PolicyViolation { ref operation, .. } if operation == "execute_workflow"
        ));
        assert!(err.to_string().contains("denied by policy"));
    }

    #[test]
    fn wildcard_allows_everything() {
        assert!(AllowListPolicy::parse("*").allows("generate_deliverable"));
        assert!(!AllowListPolicy::parse("").allows("generate_deliverable"));
    }
}
