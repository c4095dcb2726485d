use serde::Serialize;
use std::sync::RwLock;

/// Two-state breaker guarding the quick lane.
///
/// Starts `Enabled`; the only edge is `Enabled -> Disabled`. Nothing in the
/// process re-enables it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuickLaneState {
    Enabled,
    Disabled { reason: String },
}

#[derive(Debug)]
pub struct QuickLaneBreaker {
    state: RwLock<QuickLaneState>,
}

impl Default for QuickLaneBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl QuickLaneBreaker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(QuickLaneState::Enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(|e| e.into_inner()),
            QuickLaneState::Enabled
        )
    }

    pub fn disabled_reason(&self) -> Option<String> {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            QuickLaneState::Enabled => None,
            QuickLaneState::Disabled { reason } => Some(reason.clone()),
        }
    }

    pub fn state(&self) -> QuickLaneState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Disables the quick lane. Returns `true` only for the call that
    /// performed the transition; later calls keep the first reason.
    pub fn trip(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match *state {
            QuickLaneState::Enabled => {
                *state = QuickLaneState::Disabled {
                    reason: reason.into(),
                };
                true
            }
            QuickLaneState::Disabled { .. } => false,
        }
    }
}
