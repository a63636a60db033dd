use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use karma_common::EvidenceKind;
use serde::Serialize;
use serde_json::Value;

use crate::error::MarketplaceError;

/// Minimum bounty enforced client-side, one cent in the reference token's
/// smallest unit (6-decimal stablecoin), per spec.md §4.3.
pub const DEFAULT_MIN_BOUNTY: u64 = 10_000;

#[derive(Clone, Debug, Default, Serialize)]
pub struct BrowseFilter {
    pub category: Option<String>,
    pub limit: Option<u32>,
}

/// Fields a publisher supplies to `create_task`. `evidence_required` is
/// validated non-empty and `bounty` against the configured minimum before
/// any request is issued.
#[derive(Clone, Debug, Serialize)]
pub struct CreateTaskFields {
    pub title: String,
    pub description: String,
    pub category: String,
    pub bounty: u64,
    pub evidence_required: BTreeSet<EvidenceKind>,
    pub deadline: DateTime<Utc>,
}

impl CreateTaskFields {
    pub fn validate(&self, min_bounty: u64) -> Result<(), MarketplaceError> {
        if self.evidence_required.is_empty() {
            return Err(MarketplaceError::EmptyEvidenceRequired);
        }
        if self.bounty < min_bounty {
            return Err(MarketplaceError::BountyTooLow {
                bounty: self.bounty,
                minimum: min_bounty,
            });
        }
        Ok(())
    }
}

/// Validates that evidence is shaped as `{kind: payload}` with a non-empty
/// payload per kind, per spec.md §4.3 ("Any other shape is rejected
/// locally").
pub fn validate_evidence(
    evidence: &BTreeMap<EvidenceKind, Value>,
) -> Result<(), MarketplaceError> {
    if evidence.is_empty() {
        return Err(MarketplaceError::MalformedEvidence {
            reason: "evidence map must not be empty".into(),
        });
    }
    for (kind, payload) in evidence {
        let empty = match payload {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Object(m) => m.is_empty(),
            Value::Array(a) => a.is_empty(),
            _ => false,
        };
        if empty {
            return Err(MarketplaceError::MalformedEvidence {
                reason: format!("{kind:?} has an empty payload"),
            });
        }
    }
    Ok(())
}

/// `apply` is idempotent from the agent's perspective: a 409 is mapped to
/// `AlreadyApplied` and consumed silently, per spec.md §4.3/§4.4.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { application_id: String },
    AlreadyApplied,
}

#[cfg(test)]
mod tests {
    use super::*;
    use karma_common::EvidenceKind;
    use serde_json::json;

    #[test]
    fn create_task_rejects_empty_evidence() {
        let fields = CreateTaskFields {
            title: "t".into(),
            description: "d".into(),
            category: "data".into(),
            bounty: DEFAULT_MIN_BOUNTY,
            evidence_required: BTreeSet::new(),
            deadline: Utc::now(),
        };
        assert!(matches!(
            fields.validate(DEFAULT_MIN_BOUNTY),
            Err(MarketplaceError::EmptyEvidenceRequired)
        ));
    }

    #[test]
    fn create_task_rejects_low_bounty() {
        let fields = CreateTaskFields {
            title: "t".into(),
            description: "d".into(),
            category: "data".into(),
            bounty: 1,
            evidence_required: BTreeSet::from([EvidenceKind::JsonResponse]),
            deadline: Utc::now(),
        };
        assert!(matches!(
            fields.validate(DEFAULT_MIN_BOUNTY),
            Err(MarketplaceError::BountyTooLow { .. })
        ));
    }

    #[test]
    fn validate_evidence_rejects_empty_map() {
        let evidence = BTreeMap::new();
        assert!(validate_evidence(&evidence).is_err());
    }

    #[test]
    fn validate_evidence_rejects_empty_payload() {
        let mut evidence = BTreeMap::new();
        evidence.insert(EvidenceKind::JsonResponse, json!({}));
        assert!(validate_evidence(&evidence).is_err());
    }

    #[test]
    fn validate_evidence_accepts_populated_payload() {
        let mut evidence = BTreeMap::new();
        evidence.insert(EvidenceKind::JsonResponse, json!({"url": "u1", "records": 1}));
        assert!(validate_evidence(&evidence).is_ok());
    }
}
