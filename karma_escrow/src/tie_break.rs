use karma_common::{Application, ReputationSnapshot};

/// Default tie-breaking policy for `assign`: highest composite reputation
/// wins; ties are broken by earliest `created_at`, per spec.md §4.4. The
/// comparator is written explicitly rather than derived, matching the
/// explicit-comparator style used for ranking logic elsewhere in the
/// teacher's arbiter-selection code.
pub fn select_applicant<'a>(
    candidates: &'a [(Application, ReputationSnapshot)],
) -> Option<&'a Application> {
    candidates
        .iter()
        .min_by(|(a, a_rep), (b, b_rep)| {
            b_rep
                .composite
                .partial_cmp(&a_rep.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
        .map(|(application, _)| application)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use karma_common::{Address, ReputationLayer, ReputationTier};
    use uuid::Uuid;

    fn layer(score: f64) -> ReputationLayer {
        ReputationLayer {
            score,
            confidence: 1.0,
            available: true,
        }
    }

    fn snapshot(address: Address, composite: f64) -> ReputationSnapshot {
        ReputationSnapshot {
            agent_address: address,
            on_chain: layer(composite),
            off_chain: layer(composite),
            transactional: layer(composite),
            composite,
            tier: ReputationTier::Mid,
            refreshed_at: Utc::now(),
        }
    }

    fn application(address: Address, created_at: chrono::DateTime<Utc>) -> Application {
        Application {
            application_id: format!("app-{address}"),
            task_id: Uuid::nil(),
            applicant_address: address,
            message: "pick me".into(),
            created_at,
        }
    }

    #[test]
    fn highest_composite_wins() {
        let now = Utc::now();
        let low = Address::from_bytes([1u8; 20]);
        let high = Address::from_bytes([2u8; 20]);
        let candidates = vec![
            (application(low, now), snapshot(low, 40.0)),
            (application(high, now), snapshot(high, 90.0)),
        ];
        let chosen = select_applicant(&candidates).unwrap();
        assert_eq!(chosen.applicant_address, high);
    }

    #[test]
    fn ties_broken_by_earliest_created_at() {
        let now = Utc::now();
        let earlier = Address::from_bytes([1u8; 20]);
        let later = Address::from_bytes([2u8; 20]);
        let candidates = vec![
            (application(later, now + Duration::seconds(5)), snapshot(later, 70.0)),
            (application(earlier, now), snapshot(earlier, 70.0)),
        ];
        let chosen = select_applicant(&candidates).unwrap();
        assert_eq!(chosen.applicant_address, earlier);
    }
}
