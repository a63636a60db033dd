use chrono::{DateTime, Utc};
use karma_common::{Address, TaskState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in an escrow's transition history, persisted alongside the
/// record. Mirrors `EscrowAccount`'s flat, fully-owned field style in the
/// teacher's own escrow module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub from: TaskState,
    pub to: TaskState,
    pub reason: String,
}

/// The persisted shape for one task's escrow, per spec.md §4.7
/// (`escrow/<task_id>.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub task_id: Uuid,
    pub state: TaskState,
    pub publisher_address: Address,
    pub assignee_address: Option<Address>,
    pub application_id: Option<String>,
    pub submission_id: Option<String>,
    pub validator_id: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub evidence_outline: Vec<String>,
    pub last_error: Option<String>,
    /// The product name this task trades, when known. Populated by a
    /// consumer role (buyer/buyer-seller/community-buyer) from the product
    /// catalog entry it published the task against, so supply-chain
    /// ordering (spec.md §4.9) can tell which dependency a settled task
    /// paid for without re-deriving it from the task's free-text title.
    #[serde(default)]
    pub product: Option<String>,
    /// The task's own deadline, when known, so a tick can close a
    /// non-terminal record locally (spec.md §4.4's "deadline exceeded ->
    /// EXPIRED -> state-machine closes the task locally") without waiting
    /// on the marketplace to report it.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl EscrowRecord {
    pub fn new(task_id: Uuid, publisher_address: Address) -> Self {
        Self {
            task_id,
            state: TaskState::Unknown,
            publisher_address,
            assignee_address: None,
            application_id: None,
            submission_id: None,
            validator_id: None,
            history: Vec::new(),
            evidence_outline: Vec::new(),
            last_error: None,
            product: None,
            deadline: None,
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_record_roundtrip() {
        let mut record = EscrowRecord::new(Uuid::nil(), Address::from_bytes([1u8; 20]));
        record.history.push(HistoryEntry {
            at: Utc::now(),
            from: TaskState::Unknown,
            to: TaskState::Published,
            reason: "create_task accepted".into(),
        });
        let data = serde_json::to_vec(&record).unwrap();
        let decoded: EscrowRecord = serde_json::from_slice(&data).unwrap();
        assert_eq!(decoded.task_id, record.task_id);
        assert_eq!(decoded.history.len(), 1);
    }
}
