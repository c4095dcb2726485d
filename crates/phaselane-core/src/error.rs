use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhaselaneError {
    #[error("operation '{operation}' denied by policy: {reason}")]
    PolicyViolation { operation: String, reason: String },

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("unknown checkpoint: {0}")]
    UnknownCheckpoint(String),

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("not initialized: run 'phaselane init'")]
    NotInitialized,

    #[error("service initialization failed: {0}")]
    ServiceInit(String),

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl PhaselaneError {
    pub fn policy(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        PhaselaneError::PolicyViolation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PhaselaneError>;

/// Extracts the message carried by a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
