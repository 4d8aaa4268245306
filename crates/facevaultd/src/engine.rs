use facevault_core::imaging::{self, ImageQuality, IntakeError};
use facevault_core::{DetectedFace, EmbeddingProvider, ProviderError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    Intake(#[from] IntakeError),
    #[error("embedding provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Faces found in one uploaded image, most confident first.
#[derive(Debug)]
pub struct Extraction {
    pub faces: Vec<DetectedFace>,
    pub quality: ImageQuality,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Extraction, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode the upload and extract an embedding for every face in it.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Extraction, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Inference is CPU-bound and the provider holds mutable session state, so
/// all extraction is serialised through one thread fed by a bounded channel.
/// The thread exits once every [`EngineHandle`] has been dropped.
pub fn spawn_engine<P>(mut provider: P, max_image_dim: u32) -> Result<EngineHandle, EngineError>
where
    P: EmbeddingProvider + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facevault-engine".into())
        .spawn(move || {
            tracing::info!(max_image_dim, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        let result = run_extract(&mut provider, &image, max_image_dim);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_extract<P: EmbeddingProvider>(
    provider: &mut P,
    bytes: &[u8],
    max_image_dim: u32,
) -> Result<Extraction, EngineError> {
    let (image, quality) = imaging::prepare(bytes, max_image_dim)?;
    let faces = provider.extract(&image)?;
    tracing::debug!(
        width = quality.width,
        height = quality.height,
        faces = faces.len(),
        "extract: done"
    );
    Ok(Extraction { faces, quality })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{png, ColorProvider};

    #[tokio::test]
    async fn test_extract_single_face() {
        let engine = spawn_engine(ColorProvider, 1600).unwrap();
        let extraction = engine.extract(png([255, 0, 0])).await.unwrap();
        assert_eq!(extraction.faces.len(), 1);
        assert_eq!(extraction.faces[0].embedding.values, vec![1.0, 0.0, 0.0]);
        assert_eq!(extraction.quality.width, 64);
    }

    #[tokio::test]
    async fn test_extract_no_face() {
        let engine = spawn_engine(ColorProvider, 1600).unwrap();
        let extraction = engine.extract(png([0, 0, 0])).await.unwrap();
        assert!(extraction.faces.is_empty());
    }

    #[tokio::test]
    async fn test_extract_rejects_garbage() {
        let engine = spawn_engine(ColorProvider, 1600).unwrap();
        let err = engine.extract(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Intake(IntakeError::Decode(_))));
    }

    #[tokio::test]
    async fn test_extract_rejects_empty() {
        let engine = spawn_engine(ColorProvider, 1600).unwrap();
        let err = engine.extract(Vec::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Intake(IntakeError::Empty)));
    }

    #[tokio::test]
    async fn test_handles_share_one_thread() {
        let engine = spawn_engine(ColorProvider, 1600).unwrap();
        let other = engine.clone();
        let (a, b) = tokio::join!(engine.extract(png([0, 255, 0])), other.extract(png([9, 9, 9])));
        assert_eq!(a.unwrap().faces.len(), 1);
        assert_eq!(b.unwrap().faces.len(), 1);
    }
}
