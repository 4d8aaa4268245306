//! Image intake: decoding, size limits, and quality metrics for uploads.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageReader, Limits, RgbImage};

const MIN_IMAGE_SIDE: u32 = 50;
const MAX_IMAGE_SIDE: u32 = 8000;
const LOW_CONTRAST_STDDEV: f32 = 20.0;
const BLURRY_LAPLACIAN_VAR: f32 = 50.0;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("image payload is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image is too small ({width}x{height}, minimum 50x50)")]
    TooSmall { width: u32, height: u32 },
    #[error("image is too large ({width}x{height}, maximum side 8000)")]
    TooLarge { width: u32, height: u32 },
    #[error("image exceeds decoding limits: {0}")]
    ExceedsLimits(String),
}

/// Contrast and sharpness measurements on the luma channel.
#[derive(Debug, Clone, Copy)]
pub struct ImageQuality {
    pub width: u32,
    pub height: u32,
    /// Standard deviation of luma values.
    pub contrast: f32,
    /// Variance of the 4-neighbour Laplacian.
    pub sharpness: f32,
}

impl ImageQuality {
    pub fn is_low_contrast(&self) -> bool {
        self.contrast < LOW_CONTRAST_STDDEV
    }

    pub fn is_blurry(&self) -> bool {
        self.sharpness < BLURRY_LAPLACIAN_VAR
    }
}

/// Decode uploaded bytes, enforce size limits, and downscale so the longest
/// side is at most `max_dim`. Poor quality is logged, never rejected.
pub fn prepare(bytes: &[u8], max_dim: u32) -> Result<(RgbImage, ImageQuality), IntakeError> {
    let image = decode(bytes)?;
    check_bounds(&image)?;
    let image = constrain(image, max_dim);
    let quality = assess_quality(&image);

    if quality.is_low_contrast() {
        tracing::warn!(contrast = quality.contrast, "low-contrast image");
    }
    if quality.is_blurry() {
        tracing::warn!(sharpness = quality.sharpness, "blurry image");
    }

    Ok((image, quality))
}

/// Decode any supported format to 8-bit RGB.
///
/// Header dimensions are checked against the maximum side before any pixel
/// buffer is allocated.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, IntakeError> {
    if bytes.is_empty() {
        return Err(IntakeError::Empty);
    }
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    reader.limits(decode_limits());
    match reader.decode() {
        Ok(image) => Ok(image.to_rgb8()),
        Err(image::ImageError::Limits(e)) => Err(IntakeError::ExceedsLimits(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    limits
}

fn check_bounds(image: &RgbImage) -> Result<(), IntakeError> {
    let (width, height) = image.dimensions();
    if width < MIN_IMAGE_SIDE || height < MIN_IMAGE_SIDE {
        return Err(IntakeError::TooSmall { width, height });
    }
    if width > MAX_IMAGE_SIDE || height > MAX_IMAGE_SIDE {
        return Err(IntakeError::TooLarge { width, height });
    }
    Ok(())
}

/// Shrink with bilinear filtering until the longest side fits `max_dim`.
/// Images already within the limit are returned untouched.
pub fn constrain(image: RgbImage, max_dim: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if max_dim == 0 || longest <= max_dim {
        return image;
    }

    let scale = max_dim as f32 / longest as f32;
    let new_w = ((width as f32 * scale).round() as u32).max(1);
    let new_h = ((height as f32 * scale).round() as u32).max(1);
    tracing::debug!(width, height, new_w, new_h, "downscaling image");
    imageops::resize(&image, new_w, new_h, FilterType::Triangle)
}

/// Measure luma contrast and Laplacian sharpness.
pub fn assess_quality(image: &RgbImage) -> ImageQuality {
    let (width, height) = image.dimensions();
    let luma: Vec<f32> = image
        .pixels()
        .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .collect();

    ImageQuality {
        width,
        height,
        contrast: variance(&luma).sqrt(),
        sharpness: laplacian_variance(&luma, width as usize, height as usize),
    }
}

fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n
}

fn laplacian_variance(luma: &[f32], w: usize, h: usize) -> f32 {
    if w < 3 || h < 3 {
        return 0.0;
    }
    let mut responses = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = luma[y * w + x];
            let lap = luma[(y - 1) * w + x] + luma[(y + 1) * w + x] + luma[y * w + x - 1]
                + luma[y * w + x + 1]
                - 4.0 * c;
            responses.push(lap);
        }
    }
    variance(&responses)
}
