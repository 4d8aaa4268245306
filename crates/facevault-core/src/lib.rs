//! facevault-core — Face embedding matching and extraction.
//!
//! Matches query embeddings against a gallery of named faces by Euclidean
//! distance. Embeddings come from an [`EmbeddingProvider`]; the bundled
//! [`OnnxProvider`] runs SCRFD detection and ArcFace recognition via ONNX
//! Runtime on CPU.

pub mod alignment;
pub mod detector;
pub mod imaging;
pub mod matcher;
pub mod provider;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use matcher::{EuclideanMatcher, MatchError, Matcher, DEFAULT_TOLERANCE};
pub use provider::{EmbeddingProvider, OnnxProvider, ProviderError};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceRecord, MatchResult};

/// System-wide location of the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facevault/models")
}
