//! Nearest-neighbor identity matching.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchResult};

/// Strategy for deciding which enrolled identity a probe belongs to.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult;
}

/// Euclidean nearest-neighbor matcher over every enrolled sample.
///
/// Each stored vector is compared individually: an identity with five
/// enrolled samples gets five chances to be nearest, which discriminates
/// better than collapsing the samples to a centroid.
///
/// Tie-break is deterministic: displacing the current best requires a
/// strictly smaller distance, so on an exact tie the first vector in
/// enrollment order wins.
///
/// Pure function over an immutable snapshot — safe for unlimited concurrent
/// invocation without locking.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_label: Option<&str> = None;

        for identity in &gallery.identities {
            for vector in &identity.vectors {
                let distance = probe.euclidean_distance(vector);
                if distance < best_distance {
                    best_distance = distance;
                    best_label = Some(&identity.label);
                }
            }
        }

        let Some(label) = best_label else {
            // Empty gallery: unknown with confidence 0, not an error.
            return MatchResult::unknown();
        };

        let confidence = (1.0 - best_distance / gallery.threshold).max(0.0);

        // Strict inequality: a probe sitting exactly on the threshold is
        // rejected. Confidence is reported either way for diagnostics.
        if best_distance < gallery.threshold {
            MatchResult {
                matched: true,
                label: Some(label.to_string()),
                distance: best_distance,
                confidence,
            }
        } else {
            MatchResult {
                matched: false,
                label: None,
                distance: best_distance,
                confidence,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnrolledIdentity;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    fn gallery(identities: Vec<(&str, Vec<Vec<f32>>)>, threshold: f32) -> Gallery {
        Gallery {
            identities: identities
                .into_iter()
                .map(|(label, vectors)| EnrolledIdentity {
                    label: label.into(),
                    vectors: vectors.into_iter().map(emb).collect(),
                })
                .collect(),
            threshold,
            embedding_dim: 3,
            model_version: None,
        }
    }

    #[test]
    fn test_reflexivity() {
        // An enrolled vector queried back must return its own identity with
        // distance 0 and confidence 1.
        let g = gallery(vec![("jane0007", vec![vec![0.1, 0.2, 0.3]])], 0.6);
        let result = NearestMatcher.compare(&emb(vec![0.1, 0.2, 0.3]), &g);
        assert!(result.matched);
        assert_eq!(result.label.as_deref(), Some("jane0007"));
        assert_eq!(result.distance, 0.0);
        assert!((result.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejection_at_exact_threshold() {
        // Distance exactly equal to the threshold is a rejection.
        let g = gallery(vec![("jane0007", vec![vec![0.0, 0.0, 0.0]])], 0.5);
        let result = NearestMatcher.compare(&emb(vec![0.5, 0.0, 0.0]), &g);
        assert!(!result.matched);
        assert!(result.label.is_none());
        assert_eq!(result.distance, 0.5);
        assert!(result.confidence.abs() < 1e-6);
    }

    #[test]
    fn test_rejection_reports_confidence() {
        // Rejected probes still report the normalized closeness.
        let g = gallery(vec![("jane0007", vec![vec![0.0, 0.0, 0.0]])], 0.6);
        let result = NearestMatcher.compare(&emb(vec![0.9, 0.0, 0.0]), &g);
        assert!(!result.matched);
        assert_eq!(result.confidence, 0.0); // clamped: 1 - 0.9/0.6 < 0
        assert!((result.distance - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let g = Gallery::empty(0.6, 3);
        let result = NearestMatcher.compare(&emb(vec![1.0, 2.0, 3.0]), &g);
        assert!(!result.matched);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_tie_break_first_in_enrollment_order() {
        // Two identities equidistant from the probe: the one enrolled first
        // must win, every time.
        let g = gallery(
            vec![
                ("alice0001", vec![vec![1.0, 0.0, 0.0]]),
                ("bob0002", vec![vec![-1.0, 0.0, 0.0]]),
            ],
            2.0,
        );
        for _ in 0..10 {
            let result = NearestMatcher.compare(&emb(vec![0.0, 0.0, 0.0]), &g);
            assert!(result.matched);
            assert_eq!(result.label.as_deref(), Some("alice0001"));
        }
    }

    #[test]
    fn test_per_vector_matching_not_centroid() {
        // One identity enrolled with two far-apart samples. The probe sits on
        // the second sample; a centroid matcher would put the identity near
        // the midpoint and lose it.
        let g = gallery(
            vec![
                ("carol0003", vec![vec![10.0, 0.0, 0.0], vec![0.0, 0.0, 0.0]]),
                ("dave0004", vec![vec![4.9, 0.0, 0.0]]),
            ],
            0.5,
        );
        let result = NearestMatcher.compare(&emb(vec![0.0, 0.0, 0.0]), &g);
        assert!(result.matched);
        assert_eq!(result.label.as_deref(), Some("carol0003"));
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn test_nearest_across_identities() {
        let g = gallery(
            vec![
                ("alice0001", vec![vec![1.0, 0.0, 0.0]]),
                ("bob0002", vec![vec![0.1, 0.0, 0.0]]),
            ],
            0.6,
        );
        let result = NearestMatcher.compare(&emb(vec![0.0, 0.0, 0.0]), &g);
        assert!(result.matched);
        assert_eq!(result.label.as_deref(), Some("bob0002"));
    }

    #[test]
    fn test_confidence_scales_with_distance() {
        let g = gallery(vec![("jane0007", vec![vec![0.0, 0.0, 0.0]])], 0.6);
        let result = NearestMatcher.compare(&emb(vec![0.3, 0.0, 0.0]), &g);
        assert!(result.matched);
        // 1 - 0.3/0.6 = 0.5
        assert!((result.confidence - 0.5).abs() < 1e-6);
    }
}
