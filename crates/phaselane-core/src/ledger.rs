use std::sync::Mutex;

use crate::types::LaneDecisionRecord;

/// Append-only audit trail of lane decisions made in this process.
pub trait DecisionLedger: Send + Sync {
    fn append(&self, record: LaneDecisionRecord);
    fn entries(&self) -> Vec<LaneDecisionRecord>;

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    entries: Mutex<Vec<LaneDecisionRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecisionLedger for InMemoryLedger {
    fn append(&self, record: LaneDecisionRecord) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    fn entries(&self) -> Vec<LaneDecisionRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Lane, LaneDecision};

    #[test]
    fn keeps_insertion_order() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.is_empty());
        for (i, lane) in [Lane::Quick, Lane::Complex].into_iter().enumerate() {
            ledger.append(LaneDecisionRecord {
                decision: LaneDecision::new(lane, 0.5, "r"),
                user_message: format!("msg {i}"),
                recorded_at: chrono::Utc::now(),
            });
        }
        let entries = ledger.entries();
        assert_eq!(ledger.len(), 2);
        assert_eq!(entries[0].decision.lane, Lane::Quick);
        assert_eq!(entries[1].user_message, "msg 1");
    }
}
