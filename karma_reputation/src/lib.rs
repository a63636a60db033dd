//! C5: aggregates on-chain, off-chain, and transactional reputation into a
//! composite score and tier (spec.md §4.5).

use karma_common::{ReputationLayer, ReputationTier};

/// Pure function: confidence-weighted mean over available layers, falling
/// back to neutral `(50.0, confidence 0.0)` when none are available, then
/// bucketed into a tier. Grounded on `ArbiterAccount.reputation_score`'s
/// bounded-score convention, rescaled here to spec.md's 0-100 range.
pub fn compute_composite(layers: &[ReputationLayer; 3]) -> (f64, ReputationTier) {
    let available: Vec<&ReputationLayer> = layers.iter().filter(|l| l.available).collect();

    let composite = if available.is_empty() {
        50.0
    } else {
        let weight_sum: f64 = available.iter().map(|l| l.confidence).sum();
        if weight_sum <= 0.0 {
            available.iter().map(|l| l.score).sum::<f64>() / available.len() as f64
        } else {
            available
                .iter()
                .map(|l| l.score * l.confidence)
                .sum::<f64>()
                / weight_sum
        }
    };

    (composite, tier_for(composite))
}

fn tier_for(composite: f64) -> ReputationTier {
    match composite {
        c if c < 25.0 => ReputationTier::Worst,
        c if c < 50.0 => ReputationTier::Low,
        c if c < 75.0 => ReputationTier::Mid,
        c if c < 90.0 => ReputationTier::High,
        _ => ReputationTier::Best,
    }
}

/// Per-layer source: on-chain identity/reputation registries, off-chain
/// chat activity + peer ratings, transactional marketplace completion
/// rate. Confidence is derived from each source's own sample-size signal,
/// per spec.md §4.5's confidence-source column.
pub fn layer_from_sample(score: f64, sample_size: u32, max_confidence_samples: u32) -> ReputationLayer {
    if sample_size == 0 {
        return ReputationLayer {
            score: 50.0,
            confidence: 0.0,
            available: false,
        };
    }
    let confidence = (sample_size as f64 / max_confidence_samples.max(1) as f64).min(1.0);
    ReputationLayer {
        score: score.clamp(0.0, 100.0),
        confidence,
        available: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(score: f64, confidence: f64, available: bool) -> ReputationLayer {
        ReputationLayer {
            score,
            confidence,
            available,
        }
    }

    #[test]
    fn no_available_layers_yields_neutral_composite() {
        let layers = [
            layer(0.0, 0.0, false),
            layer(0.0, 0.0, false),
            layer(0.0, 0.0, false),
        ];
        let (composite, tier) = compute_composite(&layers);
        assert_eq!(composite, 50.0);
        assert_eq!(tier, ReputationTier::Mid);
    }

    #[test]
    fn composite_is_confidence_weighted_mean() {
        let layers = [
            layer(100.0, 1.0, true),
            layer(0.0, 1.0, true),
            layer(0.0, 0.0, false),
        ];
        let (composite, _) = compute_composite(&layers);
        assert!((composite - 50.0).abs() < 1e-9);
    }

    #[test]
    fn high_confidence_layer_dominates() {
        let layers = [
            layer(90.0, 0.9, true),
            layer(10.0, 0.1, true),
            layer(0.0, 0.0, false),
        ];
        let (composite, tier) = compute_composite(&layers);
        assert!(composite > 80.0);
        assert_eq!(tier, ReputationTier::Best);
    }

    #[test]
    fn tier_buckets_match_spec_ranges() {
        assert_eq!(tier_for(0.0), ReputationTier::Worst);
        assert_eq!(tier_for(24.9), ReputationTier::Worst);
        assert_eq!(tier_for(25.0), ReputationTier::Low);
        assert_eq!(tier_for(49.9), ReputationTier::Low);
        assert_eq!(tier_for(50.0), ReputationTier::Mid);
        assert_eq!(tier_for(74.9), ReputationTier::Mid);
        assert_eq!(tier_for(75.0), ReputationTier::High);
        assert_eq!(tier_for(89.9), ReputationTier::High);
        assert_eq!(tier_for(90.0), ReputationTier::Best);
        assert_eq!(tier_for(100.0), ReputationTier::Best);
    }

    #[test]
    fn layer_from_sample_scales_confidence() {
        let layer = layer_from_sample(80.0, 5, 10);
        assert!(layer.available);
        assert!((layer.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn layer_from_sample_is_unavailable_with_no_samples() {
        let layer = layer_from_sample(80.0, 0, 10);
        assert!(!layer.available);
    }
}
