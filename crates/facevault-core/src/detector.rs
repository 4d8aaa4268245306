//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB image to the 640×640 model input, decodes the three
//! anchor-free stride heads and suppresses overlaps with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied by the letterbox, for mapping back.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> (Self, usize, usize) {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32)
            .min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let letterbox = Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0,
        };
        (letterbox, new_w, new_h)
    }

    /// Map a point from model input space back to image space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// Raw head outputs for one stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces, returning boxes with landmarks sorted by confidence (highest first).
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let head = StrideOutputs {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            detections.extend(decode_stride(&head, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces = nms(detections, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox-resize an RGB image into a normalised NCHW tensor.
///
/// Padding uses the mean value so it normalises to zero.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (letterbox, new_w, new_h) = Letterbox::fit(image.width() as usize, image.height() as usize);
    let resized = imageops::resize(image, new_w as u32, new_h as u32, FilterType::Triangle);

    let off_x = letterbox.pad_x.floor() as usize;
    let off_y = letterbox.pad_y.floor() as usize;

    let size = SCRFD_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map stride heads to output tensor positions.
///
/// Uses `score_8` / `bbox_16` / `kps_32` style names when every one is present,
/// otherwise the conventional layout: scores 0-2, bboxes 3-5, kps 6-8.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode the detections above `threshold` for one stride level.
fn decode_stride(head: &StrideOutputs<'_>, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let stride = head.stride as f32;
    let grid_w = SCRFD_INPUT_SIZE / head.stride;
    let grid_h = SCRFD_INPUT_SIZE / head.stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = head.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let Some(b) = head.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * stride;
        let ay = (cell / grid_w) as f32 * stride;

        let (x1, y1) = letterbox.unmap(ax - b[0] * stride, ay - b[1] * stride);
        let (x2, y2) = letterbox.unmap(ax + b[2] * stride, ay + b[3] * stride);

        let landmarks = head.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * stride, ay + k[i * 2 + 1] * stride))
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by confidence, highest first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
