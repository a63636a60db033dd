//! C4: the buyer-initiated task escrow lifecycle (spec.md §4.4), the single
//! most important component of the core. One `EscrowMachine` instance per
//! `(agent, task_id)`.

mod machine;
mod record;
mod tie_break;

pub use machine::{EscrowError, EscrowEvent, EscrowMachine};
pub use record::{EscrowRecord, HistoryEntry};
pub use tie_break::select_applicant;

use std::collections::{BTreeMap, BTreeSet};

use karma_common::EvidenceKind;
use serde_json::Value;

/// Before `approve`, the publisher verifies that every required evidence
/// kind has a non-empty payload in the submission, per spec.md §4.4. An
/// unmet kind forces `REJECTED` rather than `APPROVED`.
pub fn evidence_satisfies_requirement(
    required: &BTreeSet<EvidenceKind>,
    evidence: &BTreeMap<EvidenceKind, Value>,
) -> bool {
    required.iter().all(|kind| match evidence.get(kind) {
        None => false,
        Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Object(m)) => !m.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evidence_satisfies_requirement_needs_every_kind() {
        let required = BTreeSet::from([EvidenceKind::JsonResponse, EvidenceKind::UrlReference]);
        let mut evidence = BTreeMap::new();
        evidence.insert(EvidenceKind::JsonResponse, json!({"url": "u1"}));
        assert!(!evidence_satisfies_requirement(&required, &evidence));

        evidence.insert(EvidenceKind::UrlReference, json!("https://example.com"));
        assert!(evidence_satisfies_requirement(&required, &evidence));
    }

    #[test]
    fn evidence_satisfies_requirement_rejects_empty_payload() {
        let required = BTreeSet::from([EvidenceKind::JsonResponse]);
        let mut evidence = BTreeMap::new();
        evidence.insert(EvidenceKind::JsonResponse, json!({}));
        assert!(!evidence_satisfies_requirement(&required, &evidence));
    }
}
