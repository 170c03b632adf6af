//! Nearest-neighbour matching of probe embeddings against a gallery.

use crate::types::{Embedding, Gallery, MatchResult};
use serde::{Deserialize, Serialize};

/// Distance space an encoder's embeddings live in.
///
/// Raw Euclidean distances are multiplied by `scale` to obtain the
/// normalized distance used for acceptance and confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceMetric {
    pub scale: f64,
    /// Largest normalized distance at which two faces are the same person.
    pub acceptance_radius: f64,
}

impl DistanceMetric {
    pub const fn euclidean(acceptance_radius: f64) -> Self {
        Self {
            scale: 1.0,
            acceptance_radius,
        }
    }

    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f64 {
        a.euclidean_distance(b) * self.scale
    }

    pub fn accepts(&self, distance: f64) -> bool {
        distance <= self.acceptance_radius
    }

    pub fn is_match(&self, a: &Embedding, b: &Embedding) -> bool {
        self.accepts(self.distance(a, b))
    }
}

impl Default for DistanceMetric {
    /// dlib-style 128-d embeddings with the customary 0.6 tolerance.
    fn default() -> Self {
        Self::euclidean(0.6)
    }
}

/// Whether `threshold` is a usable distance cutoff (finite, within [0, 1]).
pub fn is_valid_threshold(threshold: f64) -> bool {
    (0.0..=1.0).contains(&threshold)
}

/// Strategy for comparing a probe embedding against a gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f64) -> MatchResult;
}

/// Minimum-distance matcher with a two-stage accept rule.
///
/// The closest gallery entry wins (earliest entry on ties). It is accepted
/// only when its distance is inside the metric's acceptance radius and also
/// within the caller's threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher {
    metric: DistanceMetric,
}

impl EuclideanMatcher {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Index and normalized distance of the closest gallery entry.
    pub fn nearest(&self, probe: &Embedding, gallery: &Gallery) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, reference) in gallery.embeddings().iter().enumerate() {
            let distance = self.metric.distance(probe, reference);
            // Strict comparison keeps the first of equal distances; NaN never wins.
            let closer = match best {
                None => !distance.is_nan(),
                Some((_, d)) => distance < d,
            };
            if closer {
                best = Some((i, distance));
            }
        }
        best
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f64) -> MatchResult {
        let Some((idx, distance)) = self.nearest(probe, gallery) else {
            return MatchResult::unknown();
        };

        if self.metric.accepts(distance) && distance <= threshold {
            tracing::debug!(
                identity = %gallery.identities()[idx],
                distance,
                "match accepted"
            );
            MatchResult {
                identity: Some(gallery.identities()[idx].clone()),
                confidence: (1.0 - distance).clamp(0.0, 1.0),
            }
        } else {
            tracing::debug!(distance, threshold, "closest face rejected");
            MatchResult::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn gallery(entries: &[(&str, &[f64])]) -> Gallery {
        entries.iter().map(|(id, v)| (*id, emb(v))).collect()
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let matcher = EuclideanMatcher::default();
        for threshold in [0.0, 0.3, 1.0] {
            let result = matcher.compare(&emb(&[0.1, 0.2]), &Gallery::new(), threshold);
            assert_eq!(result, MatchResult::unknown());
        }
    }

    #[test]
    fn test_exact_probe_matches_with_full_confidence() {
        let g = gallery(&[("bob", &[0.9, 0.1]), ("alice", &[0.1, 0.2])]);
        let result = EuclideanMatcher::default().compare(&emb(&[0.1, 0.2]), &g, 0.6);
        assert_eq!(result.identity.as_deref(), Some("alice"));
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tie_goes_to_earliest_entry() {
        let g = gallery(&[("first", &[1.0, 0.0]), ("second", &[-1.0, 0.0])]);
        let matcher = EuclideanMatcher::new(DistanceMetric::euclidean(2.0));
        let result = matcher.compare(&emb(&[0.0, 0.0]), &g, 1.0);
        assert_eq!(result.identity.as_deref(), Some("first"));
        assert!(result.confidence.abs() < 1e-9);
    }

    #[test]
    fn test_outside_acceptance_radius_is_unknown() {
        // Distance 0.5 passes the threshold but not the 0.4 radius.
        let g = gallery(&[("alice", &[0.5, 0.0])]);
        let matcher = EuclideanMatcher::new(DistanceMetric::euclidean(0.4));
        let result = matcher.compare(&emb(&[0.0, 0.0]), &g, 0.9);
        assert_eq!(result, MatchResult::unknown());
    }

    #[test]
    fn test_outside_threshold_is_unknown() {
        // Distance 0.5 passes the 0.6 radius but not the 0.3 threshold.
        let g = gallery(&[("alice", &[0.5, 0.0])]);
        let result = EuclideanMatcher::default().compare(&emb(&[0.0, 0.0]), &g, 0.3);
        assert_eq!(result, MatchResult::unknown());

        let accepted = EuclideanMatcher::default().compare(&emb(&[0.0, 0.0]), &g, 0.5);
        assert_eq!(accepted.identity.as_deref(), Some("alice"));
        assert!((accepted.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_metric_scale_normalizes_distance() {
        let metric = DistanceMetric {
            scale: 0.5,
            acceptance_radius: 0.55,
        };
        let g = gallery(&[("alice", &[1.0, 0.0])]);
        let result = EuclideanMatcher::new(metric).compare(&emb(&[0.0, 1.0]), &g, 1.0);
        // sqrt(2) * 0.5 ≈ 0.707 exceeds the radius.
        assert!(!result.is_known());
        assert!(metric.is_match(&emb(&[1.0, 0.0]), &emb(&[0.8, 0.6])));
    }

    #[test]
    fn test_mismatched_dimensions_never_match() {
        let g = gallery(&[("alice", &[0.0, 0.0, 0.0])]);
        let result = EuclideanMatcher::default().compare(&emb(&[0.0, 0.0]), &g, 1.0);
        assert_eq!(result, MatchResult::unknown());
    }

    #[test]
    fn test_nan_distance_never_selected() {
        let g = gallery(&[("broken", &[f64::NAN, 0.0]), ("alice", &[0.1, 0.0])]);
        let matcher = EuclideanMatcher::default();
        assert_eq!(matcher.nearest(&emb(&[0.0, 0.0]), &g).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_compare_is_deterministic() {
        let g = gallery(&[("alice", &[0.1, 0.1]), ("bob", &[0.2, 0.3])]);
        let probe = emb(&[0.15, 0.2]);
        let matcher = EuclideanMatcher::default();
        let first = matcher.compare(&probe, &g, 0.6);
        for _ in 0..5 {
            assert_eq!(matcher.compare(&probe, &g, 0.6), first);
        }
    }

    #[test]
    fn test_threshold_validation() {
        assert!(is_valid_threshold(0.0));
        assert!(is_valid_threshold(1.0));
        assert!(!is_valid_threshold(-0.01));
        assert!(!is_valid_threshold(1.5));
        assert!(!is_valid_threshold(f64::NAN));
    }
}
