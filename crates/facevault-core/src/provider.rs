//! Embedding providers: anything that turns an image into per-face embeddings.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Source of face embeddings.
///
/// Returns one [`DetectedFace`] per face, most confident first. An empty
/// vector means no face was found. Implementations may hold mutable
/// inference state, so extraction takes `&mut self`.
pub trait EmbeddingProvider {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError>;
}

/// SCRFD detection followed by ArcFace embedding, both on ONNX Runtime.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxProvider {
    /// Load both models from `model_dir`. Fails if either file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let embedding = self.recognizer.extract(image, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }
        Ok(faces)
    }
}
