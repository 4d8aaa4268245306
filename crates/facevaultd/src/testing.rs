//! Test doubles shared by the daemon's unit tests.

use std::io::Cursor;
use std::sync::Arc;

use facevault_core::{BoundingBox, DetectedFace, Embedding, EmbeddingProvider, ProviderError};
use facevault_store::FaceStore;
use image::{ImageFormat, Rgb, RgbImage};

use crate::engine::spawn_engine;
use crate::service::FaceService;

/// Derives a 3-dim embedding from the colour of the top-left pixel.
///
/// Pure black yields no face; a saturated blue channel yields two identical
/// faces. Anything else is one face.
pub struct ColorProvider;

impl EmbeddingProvider for ColorProvider {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let pixel = image.get_pixel(0, 0);
        if pixel.0 == [0, 0, 0] {
            return Ok(Vec::new());
        }
        let face = DetectedFace {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width() as f32,
                height: image.height() as f32,
                confidence: 0.9,
                landmarks: None,
            },
            embedding: Embedding::new(pixel.0.iter().map(|&c| c as f32 / 255.0).collect()),
        };
        let count = if pixel[2] == 255 { 2 } else { 1 };
        Ok(vec![face; count])
    }
}

/// Encode a 64x64 solid-colour PNG.
pub fn png(rgb: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(64, 64, Rgb(rgb));
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode test png");
    buf.into_inner()
}

/// Panics on every extraction, taking the engine thread down with it.
pub struct PanickingProvider;

impl EmbeddingProvider for PanickingProvider {
    fn extract(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        panic!("inference crashed");
    }
}

/// In-memory service backed by [`ColorProvider`] with tolerance 0.5.
pub async fn service() -> Arc<FaceService> {
    let store = FaceStore::open_in_memory().await.expect("open store");
    service_with(store, ColorProvider)
}

/// Service over an existing store and any provider, with tolerance 0.5.
pub fn service_with<P>(store: FaceStore, provider: P) -> Arc<FaceService>
where
    P: EmbeddingProvider + Send + 'static,
{
    let engine = spawn_engine(provider, 1600).expect("spawn engine");
    Arc::new(FaceService::new(store, engine, 0.5))
}
