//! Nearest-label matching over the descriptor store.

use crate::store::DescriptorStore;
use crate::types::{Embedding, FaceMatch, LabeledDescriptor, UNKNOWN_LABEL};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

/// Strategy for turning a query embedding into an identity label.
pub trait Matcher {
    fn best_match(&self, query: &Embedding, store: &DescriptorStore) -> FaceMatch;
}

/// Best-sample Euclidean matcher.
///
/// Each label is scored by its closest embedding, not by a centroid.
/// Entries without embeddings never become candidates.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Match against any sequence of descriptors.
    pub fn match_descriptors<'a, I>(&self, query: &Embedding, descriptors: I) -> FaceMatch
    where
        I: IntoIterator<Item = &'a LabeledDescriptor>,
    {
        let mut best: Option<(&str, f32)> = None;

        for descriptor in descriptors {
            let Some(distance) = descriptor
                .embeddings
                .iter()
                .map(|e| query.euclidean_distance(e))
                .min_by(f32::total_cmp)
            else {
                continue;
            };

            // Strict comparison: the earliest entry keeps a tie.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((descriptor.label.as_str(), distance));
            }
        }

        match best {
            Some((label, distance)) if distance <= self.threshold => FaceMatch {
                label: label.to_string(),
                distance,
            },
            Some((_, distance)) => FaceMatch {
                label: UNKNOWN_LABEL.to_string(),
                distance,
            },
            None => FaceMatch {
                label: UNKNOWN_LABEL.to_string(),
                distance: f32::INFINITY,
            },
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, query: &Embedding, store: &DescriptorStore) -> FaceMatch {
        self.match_descriptors(query, store.descriptors())
    }
}
