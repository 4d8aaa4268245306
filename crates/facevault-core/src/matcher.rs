//! Nearest-embedding matching.

use crate::types::{Embedding, FaceRecord, MatchResult};
use thiserror::Error;

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("tolerance must be a finite, non-negative number (got {0})")]
    InvalidTolerance(f32),
    #[error("embedding dimension mismatch: query has {query}, record {id} has {stored}")]
    DimensionMismatch { id: i64, query: usize, stored: usize },
}

/// Strategy for comparing a query embedding against the known faces.
pub trait Matcher {
    fn find_best_match(
        &self,
        query: &Embedding,
        known: &[FaceRecord],
        tolerance: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean (L2) distance matcher.
///
/// Every record is compared; among records at the same minimum distance the
/// lowest id wins, so the outcome does not depend on gallery order. Records
/// whose distance is not finite (NaN components) are never selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find_best_match(
        &self,
        query: &Embedding,
        known: &[FaceRecord],
        tolerance: f32,
    ) -> Result<MatchResult, MatchError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(MatchError::InvalidTolerance(tolerance));
        }

        let mut best: Option<(f32, &FaceRecord)> = None;

        for record in known {
            if record.embedding.dim() != query.dim() {
                return Err(MatchError::DimensionMismatch {
                    id: record.id,
                    query: query.dim(),
                    stored: record.embedding.dim(),
                });
            }

            let distance = query.euclidean_distance(&record.embedding);
            if !distance.is_finite() {
                tracing::warn!(id = record.id, name = %record.name, "skipping face with non-finite distance");
                continue;
            }
            let is_better = match best {
                None => true,
                Some((best_distance, best_record)) => {
                    distance < best_distance
                        || (distance == best_distance && record.id < best_record.id)
                }
            };
            if is_better {
                best = Some((distance, record));
            }
        }

        let Some((distance, record)) = best else {
            return Ok(MatchResult::no_candidates());
        };

        let result = if distance <= tolerance {
            MatchResult {
                is_recognized: true,
                matched_name: Some(record.name.clone()),
                matched_id: Some(record.id),
                distance: Some(distance),
                confidence: confidence(distance),
                candidate_count: known.len(),
            }
        } else {
            MatchResult {
                is_recognized: false,
                matched_name: None,
                matched_id: None,
                distance: Some(distance),
                confidence: 0.0,
                candidate_count: known.len(),
            }
        };

        tracing::debug!(
            recognized = result.is_recognized,
            distance,
            tolerance,
            candidates = known.len(),
            "match evaluated"
        );

        Ok(result)
    }
}

/// Map a distance onto a [0, 1] confidence score.
pub fn confidence(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}
