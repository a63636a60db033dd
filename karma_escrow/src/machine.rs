use chrono::Utc;
use karma_common::{Address, TaskState};
use thiserror::Error;

use crate::record::{EscrowRecord, HistoryEntry};

/// Remote/local events the scheduler feeds into the state machine as it
/// drives a task through spec.md §4.4's lifecycle.
#[derive(Clone, Debug)]
pub enum EscrowEvent {
    TaskCreated,
    Applied { application_id: String },
    /// A `409 Conflict` on apply: consumed as a confirmation that an
    /// application already exists, not an error (spec.md §4.3/§4.4).
    AlreadyApplied,
    Assigned { assignee: Address },
    Submitted { submission_id: String },
    Approved,
    Settled,
    DeadlineExceeded,
    Cancelled,
    Rejected,
    /// A permanent `422`: the task enters the local `FAILED` sub-state,
    /// never reported back to the marketplace (spec.md §7).
    SchemaInvalid { body: String },
}

impl EscrowEvent {
    fn reason(&self) -> String {
        match self {
            EscrowEvent::TaskCreated => "create_task accepted".into(),
            EscrowEvent::Applied { application_id } => {
                format!("apply accepted, application_id={application_id}")
            }
            EscrowEvent::AlreadyApplied => "apply returned 409, already applied".into(),
            EscrowEvent::Assigned { assignee } => format!("assign accepted, assignee={assignee}"),
            EscrowEvent::Submitted { submission_id } => {
                format!("submit accepted, submission_id={submission_id}")
            }
            EscrowEvent::Approved => "approve accepted".into(),
            EscrowEvent::Settled => "facilitator executed on-chain transfer".into(),
            EscrowEvent::DeadlineExceeded => "deadline exceeded".into(),
            EscrowEvent::Cancelled => "publisher cancelled".into(),
            EscrowEvent::Rejected => "publisher rejected submission".into(),
            EscrowEvent::SchemaInvalid { body } => format!("422 schema rejection: {body}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("illegal transition: no edge from {from:?} on event {event:?}")]
    InvalidTransition { from: TaskState, event: EscrowEvent },
}

impl std::fmt::Debug for EscrowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Wraps one task's `EscrowRecord` and is the sole mutator of its state.
/// `apply_event` is the only way the state advances; illegal transitions
/// return an error rather than silently clamping (Testable Property 3).
pub struct EscrowMachine {
    record: EscrowRecord,
}

impl EscrowMachine {
    pub fn new(record: EscrowRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &EscrowRecord {
        &self.record
    }

    pub fn into_record(self) -> EscrowRecord {
        self.record
    }

    fn transition(&mut self, to: TaskState, event: &EscrowEvent) {
        let from = self.record.state;
        self.record.history.push(HistoryEntry {
            at: Utc::now(),
            from,
            to,
            reason: event.reason(),
        });
        self.record.state = to;
    }

    /// Applies one event, returning the resulting state or a typed error
    /// describing the illegal transition attempted. Never panics; never
    /// persists a half-applied change (the caller writes `record()` after
    /// a successful call).
    pub fn apply_event(&mut self, event: EscrowEvent) -> Result<TaskState, EscrowError> {
        use TaskState::*;

        // A settlement event while already settled is a no-op, per
        // spec.md §4.4/§9: the facilitator may emit duplicate receipts.
        if matches!(event, EscrowEvent::Settled) && self.record.state == Settled {
            return Ok(Settled);
        }

        let target = match (self.record.state, &event) {
            (Unknown, EscrowEvent::TaskCreated) => Published,
            (Published, EscrowEvent::Applied { .. }) | (Published, EscrowEvent::AlreadyApplied) => {
                Applied
            }
            (Applied, EscrowEvent::Assigned { .. }) => Assigned,
            (Assigned, EscrowEvent::Submitted { .. }) => Submitted,
            (Submitted, EscrowEvent::Approved) => Approved,
            (Approved, EscrowEvent::Settled) => Settled,
            (state, EscrowEvent::DeadlineExceeded) if !state.is_terminal() => Expired,
            (Published, EscrowEvent::Cancelled) => Cancelled,
            (Submitted, EscrowEvent::Rejected) => Rejected,
            (_, EscrowEvent::SchemaInvalid { .. }) => Failed,
            (from, _) => {
                return Err(EscrowError::InvalidTransition { from, event });
            }
        };

        match &event {
            EscrowEvent::Applied { application_id } => {
                self.record.application_id = Some(application_id.clone());
            }
            EscrowEvent::Assigned { assignee } => {
                self.record.assignee_address = Some(*assignee);
            }
            EscrowEvent::Submitted { submission_id } => {
                self.record.submission_id = Some(submission_id.clone());
            }
            EscrowEvent::SchemaInvalid { body } => {
                self.record.last_error = Some(body.clone());
            }
            _ => {}
        }

        self.transition(target, &event);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn publisher() -> Address {
        Address::from_bytes([1u8; 20])
    }

    fn fresh_machine() -> EscrowMachine {
        EscrowMachine::new(EscrowRecord::new(Uuid::nil(), publisher()))
    }

    #[test]
    fn happy_path_reaches_settled() {
        let mut machine = fresh_machine();
        assert_eq!(
            machine.apply_event(EscrowEvent::TaskCreated).unwrap(),
            TaskState::Published
        );
        assert_eq!(
            machine
                .apply_event(EscrowEvent::Applied {
                    application_id: "app-1".into()
                })
                .unwrap(),
            TaskState::Applied
        );
        assert_eq!(
            machine
                .apply_event(EscrowEvent::Assigned {
                    assignee: Address::from_bytes([2u8; 20])
                })
                .unwrap(),
            TaskState::Assigned
        );
        assert_eq!(
            machine
                .apply_event(EscrowEvent::Submitted {
                    submission_id: "sub-1".into()
                })
                .unwrap(),
            TaskState::Submitted
        );
        assert_eq!(
            machine.apply_event(EscrowEvent::Approved).unwrap(),
            TaskState::Approved
        );
        assert_eq!(
            machine.apply_event(EscrowEvent::Settled).unwrap(),
            TaskState::Settled
        );
        assert_eq!(machine.record().state, TaskState::Settled);
        assert_eq!(machine.record().history.len(), 6);
    }

    #[test]
    fn duplicate_apply_via_409_advances_to_applied() {
        let mut machine = fresh_machine();
        machine.apply_event(EscrowEvent::TaskCreated).unwrap();
        machine
            .apply_event(EscrowEvent::Applied {
                application_id: "app-1".into(),
            })
            .unwrap();
        // A second apply attempt that the marketplace answers with 409.
        let state = machine.apply_event(EscrowEvent::AlreadyApplied);
        assert!(state.is_err());
        assert_eq!(machine.record().state, TaskState::Applied);
        assert_eq!(machine.record().application_id.as_deref(), Some("app-1"));
    }

    #[test]
    fn illegal_transition_is_rejected_and_not_persisted() {
        let mut machine = fresh_machine();
        let err = machine.apply_event(EscrowEvent::Approved).unwrap_err();
        assert!(matches!(err, EscrowError::InvalidTransition { from: TaskState::Unknown, .. }));
        assert_eq!(machine.record().state, TaskState::Unknown);
    }

    #[test]
    fn duplicate_settlement_is_a_no_op() {
        let mut machine = fresh_machine();
        machine.apply_event(EscrowEvent::TaskCreated).unwrap();
        machine
            .apply_event(EscrowEvent::Applied {
                application_id: "app-1".into(),
            })
            .unwrap();
        machine
            .apply_event(EscrowEvent::Assigned {
                assignee: Address::from_bytes([2u8; 20]),
            })
            .unwrap();
        machine
            .apply_event(EscrowEvent::Submitted {
                submission_id: "sub-1".into(),
            })
            .unwrap();
        machine.apply_event(EscrowEvent::Approved).unwrap();
        machine.apply_event(EscrowEvent::Settled).unwrap();
        let history_len = machine.record().history.len();
        assert_eq!(machine.apply_event(EscrowEvent::Settled).unwrap(), TaskState::Settled);
        assert_eq!(machine.record().history.len(), history_len, "no new history entry for a duplicate settlement");
    }

    #[test]
    fn schema_invalid_forces_failed_from_any_state() {
        let mut machine = fresh_machine();
        machine.apply_event(EscrowEvent::TaskCreated).unwrap();
        let state = machine
            .apply_event(EscrowEvent::SchemaInvalid {
                body: "bad bounty".into(),
            })
            .unwrap();
        assert_eq!(state, TaskState::Failed);
        assert_eq!(machine.record().last_error.as_deref(), Some("bad bounty"));
    }

    #[test]
    fn deadline_exceeded_closes_any_non_terminal_task() {
        let mut machine = fresh_machine();
        machine.apply_event(EscrowEvent::TaskCreated).unwrap();
        machine
            .apply_event(EscrowEvent::Applied {
                application_id: "app-1".into(),
            })
            .unwrap();
        let state = machine.apply_event(EscrowEvent::DeadlineExceeded).unwrap();
        assert_eq!(state, TaskState::Expired);
    }
}
