use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Fixed-length face feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance between two embeddings of equal length.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Little-endian `f32` byte encoding used for storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` when the
    /// byte length is not a multiple of four.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }
}

/// One face found by an [`EmbeddingProvider`](crate::EmbeddingProvider).
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A stored identity: unique name plus its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: i64,
    pub name: String,
    pub embedding: Embedding,
    pub created_at: String,
    pub updated_at: String,
}

/// Outcome of matching one query embedding against the known faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_recognized: bool,
    /// Name of the matched record, only when recognized.
    pub matched_name: Option<String>,
    /// Id of the matched record, only when recognized.
    pub matched_id: Option<i64>,
    /// Distance to the nearest candidate; `None` when there were no candidates.
    pub distance: Option<f32>,
    /// `1 - distance` clamped to [0, 1] when recognized, otherwise 0.
    pub confidence: f32,
    pub candidate_count: usize,
}

impl MatchResult {
    /// Result for an empty gallery.
    pub fn no_candidates() -> Self {
        Self {
            is_recognized: false,
            matched_name: None,
            matched_id: None,
            distance: None,
            confidence: 0.0,
            candidate_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = Embedding::new(vec![0.25, -0.5, 0.75]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_le_bytes_roundtrip() {
        let a = Embedding::new(vec![1.5, -0.0625, 1e-7]);
        let bytes = a.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Embedding::from_le_bytes(&bytes), Some(a));
    }

    #[test]
    fn test_from_le_bytes_rejects_ragged_length() {
        assert!(Embedding::from_le_bytes(&[0, 0, 128]).is_none());
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let a = Embedding::new(vec![1.0, 2.0]);
        assert_eq!(serde_json::to_string(&a).unwrap(), "[1.0,2.0]");
    }
}
