use facevault_core::imaging::IntakeError;
use facevault_core::{EuclideanMatcher, FaceRecord, MatchError, MatchResult, Matcher, ProviderError};
use facevault_store::{FaceKey, FaceStore, StoreError};
use serde::Serialize;
use thiserror::Error;

use crate::engine::{EngineError, EngineHandle, Extraction};
use crate::gallery::Gallery;
use crate::validate::{validate_name, ValidationError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid image: {0}")]
    InvalidImage(IntakeError),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("expected exactly one face, found {0}")]
    MultipleFaces(usize),
    #[error("face is already registered as '{name}' (id {id}, distance {distance:.4})")]
    DuplicateFace { name: String, id: i64, distance: f32 },
    #[error("a face named '{0}' already exists")]
    NameTaken(String),
    #[error("no face found for {0}")]
    NotFound(FaceKey),
    #[error("face engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("embedding provider failed: {0}")]
    Provider(ProviderError),
    #[error("matching failed: {0}")]
    Match(MatchError),
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl ServiceError {
    /// Stable machine-readable code returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidImage(_) => "INVALID_IMAGE",
            Self::NoFaceDetected => "NO_FACE_DETECTED",
            Self::MultipleFaces(_) => "MULTIPLE_FACES",
            Self::DuplicateFace { .. } => "DUPLICATE_FACE",
            Self::NameTaken(_) => "NAME_TAKEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            Self::Provider(_) | Self::Match(_) | Self::Store(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Intake(e) => Self::InvalidImage(e),
            EngineError::Provider(e) => Self::Provider(e),
            EngineError::Spawn(_) | EngineError::ChannelClosed => {
                Self::EngineUnavailable(err.to_string())
            }
        }
    }
}

impl From<MatchError> for ServiceError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::InvalidTolerance(t) => {
                Self::Validation(ValidationError::InvalidTolerance(t.to_string()))
            }
            other => Self::Match(other),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NameTaken(name) => Self::NameTaken(name),
            other => Self::Store(other),
        }
    }
}

/// A stored face without its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceSummary {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&FaceRecord> for FaceSummary {
    fn from(record: &FaceRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_faces: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub database: DatabaseStatus,
    /// Faces in the gallery cache; `None` until the first load.
    pub loaded_faces: Option<usize>,
    /// Dimension of the cached embeddings; `None` if nothing is cached.
    pub embedding_dim: Option<usize>,
    pub tolerance: f32,
}

/// Registration, recognition and deletion workflows over the store, the
/// gallery cache and the engine thread.
pub struct FaceService {
    store: FaceStore,
    engine: EngineHandle,
    gallery: Gallery,
    matcher: EuclideanMatcher,
    tolerance: f32,
}

impl FaceService {
    pub fn new(store: FaceStore, engine: EngineHandle, tolerance: f32) -> Self {
        Self {
            store,
            engine,
            gallery: Gallery::new(),
            matcher: EuclideanMatcher,
            tolerance,
        }
    }

    /// Register the single face in `image` under `name` (or a generated one).
    ///
    /// Rejects images with zero or several faces, and faces within the
    /// recognition tolerance of an existing record.
    pub async fn register(
        &self,
        image: Vec<u8>,
        name: Option<String>,
    ) -> Result<FaceRecord, ServiceError> {
        let name = match name {
            Some(raw) => validate_name(&raw)?,
            None => format!("face-{}", uuid::Uuid::new_v4()),
        };

        let Extraction { mut faces, quality } = self.engine.extract(image).await?;
        let face = match faces.len() {
            0 => return Err(ServiceError::NoFaceDetected),
            1 => faces.remove(0),
            n => return Err(ServiceError::MultipleFaces(n)),
        };

        let known = self.gallery.snapshot(&self.store).await?;
        let result = self
            .matcher
            .find_best_match(&face.embedding, &known, self.tolerance)?;
        if let MatchResult {
            is_recognized: true,
            matched_name: Some(existing),
            matched_id: Some(id),
            distance: Some(distance),
            ..
        } = result
        {
            tracing::info!(name = %name, existing = %existing, distance, "register: duplicate face");
            return Err(ServiceError::DuplicateFace {
                name: existing,
                id,
                distance,
            });
        }

        let record = self.store.insert(&name, &face.embedding).await?;
        self.gallery.invalidate().await;

        tracing::info!(
            id = record.id,
            name = %record.name,
            confidence = face.bbox.confidence,
            contrast = quality.contrast,
            sharpness = quality.sharpness,
            "face registered"
        );
        Ok(record)
    }

    /// Match the most confident face in `image` against every stored face.
    pub async fn recognize(
        &self,
        image: Vec<u8>,
        tolerance: Option<f32>,
    ) -> Result<MatchResult, ServiceError> {
        let tolerance = tolerance.unwrap_or(self.tolerance);
        let Extraction { faces, .. } = self.engine.extract(image).await?;
        let face = faces.first().ok_or(ServiceError::NoFaceDetected)?;
        if faces.len() > 1 {
            tracing::debug!(faces = faces.len(), "recognize: using most confident face");
        }

        let known = self.gallery.snapshot(&self.store).await?;
        let result = self
            .matcher
            .find_best_match(&face.embedding, &known, tolerance)?;

        tracing::info!(
            recognized = result.is_recognized,
            name = result.matched_name.as_deref().unwrap_or("-"),
            distance = result.distance,
            candidates = result.candidate_count,
            "recognize: done"
        );
        Ok(result)
    }

    pub async fn delete(&self, key: FaceKey) -> Result<(), ServiceError> {
        if !self.store.delete(&key).await? {
            return Err(ServiceError::NotFound(key));
        }
        self.gallery.invalidate().await;
        tracing::info!(key = %key, "face deleted");
        Ok(())
    }

    /// All stored faces, ordered by id.
    pub async fn list(&self) -> Result<Vec<FaceSummary>, ServiceError> {
        let known = self.gallery.snapshot(&self.store).await?;
        Ok(known.iter().map(FaceSummary::from).collect())
    }

    pub async fn contains(&self, name: &str) -> Result<bool, ServiceError> {
        let key = FaceKey::Name(name.to_string());
        Ok(self.store.get(&key).await?.is_some())
    }

    /// Drop the gallery cache and reload it; returns the loaded count.
    pub async fn refresh(&self) -> Result<usize, ServiceError> {
        self.gallery.invalidate().await;
        let known = self.gallery.snapshot(&self.store).await?;
        tracing::info!(count = known.len(), "gallery refreshed");
        Ok(known.len())
    }

    async fn check_database(&self) -> Result<usize, StoreError> {
        self.store.ping().await?;
        self.store.count().await
    }

    /// Health summary. Database failures are reported, not returned.
    pub async fn status(&self) -> ServiceStatus {
        let database = match self.check_database().await {
            Ok(count) => DatabaseStatus {
                connected: true,
                error: None,
                stored_faces: Some(count),
            },
            Err(e) => {
                tracing::warn!(error = %e, "status: database check failed");
                DatabaseStatus {
                    connected: false,
                    error: Some(e.to_string()),
                    stored_faces: None,
                }
            }
        };

        let cached = self.gallery.cached().await;

        ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            database,
            loaded_faces: cached.as_ref().map(|known| known.len()),
            embedding_dim: cached
                .as_ref()
                .and_then(|known| known.first())
                .map(|r| r.embedding.dim()),
            tolerance: self.tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{png, service};

    const RED: [u8; 3] = [255, 0, 0];
    const DARK_RED: [u8; 3] = [200, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLACK: [u8; 3] = [0, 0, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    #[tokio::test]
    async fn test_register_then_recognize() {
        let svc = service().await;
        let record = svc.register(png(RED), Some(" Juan ".into())).await.unwrap();
        assert_eq!(record.name, "Juan");
        assert_eq!(record.embedding.values, vec![1.0, 0.0, 0.0]);

        let result = svc.recognize(png(RED), None).await.unwrap();
        assert!(result.is_recognized);
        assert_eq!(result.matched_name.as_deref(), Some("Juan"));
        assert_eq!(result.matched_id, Some(record.id));
        assert_eq!(result.distance, Some(0.0));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.candidate_count, 1);
    }

    #[tokio::test]
    async fn test_register_same_face_twice_is_duplicate() {
        let svc = service().await;
        svc.register(png(RED), Some("Juan".into())).await.unwrap();
        let err = svc.register(png(DARK_RED), Some("Juan2".into())).await.unwrap_err();
        match err {
            ServiceError::DuplicateFace { name, distance, .. } => {
                assert_eq!(name, "Juan");
                assert!(distance < 0.5);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(svc.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_identical_image_twice_is_duplicate() {
        let svc = service().await;
        let image = png(RED);
        let first = svc.register(image.clone(), Some("Juan".into())).await.unwrap();
        let err = svc.register(image, Some("Juan bis".into())).await.unwrap_err();
        match err {
            ServiceError::DuplicateFace { name, id, distance } => {
                assert_eq!(name, "Juan");
                assert_eq!(id, first.id);
                assert_eq!(distance, 0.0);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert!(!svc.contains("Juan bis").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_generates_name() {
        let svc = service().await;
        let record = svc.register(png(GREEN), None).await.unwrap();
        assert!(record.name.starts_with("face-"));
        assert_eq!(record.name.len(), "face-".len() + 36);
    }

    #[tokio::test]
    async fn test_register_face_count_errors() {
        let svc = service().await;
        assert!(matches!(
            svc.register(png(BLACK), None).await,
            Err(ServiceError::NoFaceDetected)
        ));
        assert!(matches!(
            svc.register(png(BLUE), None).await,
            Err(ServiceError::MultipleFaces(2))
        ));
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_name_taken() {
        let svc = service().await;
        svc.register(png(RED), Some("ana".into())).await.unwrap();
        let err = svc.register(png(GREEN), Some("ana".into())).await.unwrap_err();
        assert!(matches!(err, ServiceError::NameTaken(ref n) if n == "ana"));
        assert_eq!(err.code(), "NAME_TAKEN");
    }

    #[tokio::test]
    async fn test_register_invalid_name_skips_engine() {
        let svc = service().await;
        let err = svc.register(b"garbage".to_vec(), Some("  ".into())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::EmptyName)));
    }

    #[tokio::test]
    async fn test_invalid_image() {
        let svc = service().await;
        let err = svc.recognize(b"garbage".to_vec(), None).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_IMAGE");
    }

    #[tokio::test]
    async fn test_recognize_empty_gallery() {
        let svc = service().await;
        let result = svc.recognize(png(RED), None).await.unwrap();
        assert!(!result.is_recognized);
        assert_eq!(result.distance, None);
        assert_eq!(result.candidate_count, 0);
    }

    #[tokio::test]
    async fn test_recognize_respects_tolerance_override() {
        let svc = service().await;
        svc.register(png(RED), Some("Juan".into())).await.unwrap();
        // distance 55/255 ~= 0.216
        let strict = svc.recognize(png(DARK_RED), Some(0.1)).await.unwrap();
        assert!(!strict.is_recognized);
        assert_eq!(strict.confidence, 0.0);
        let loose = svc.recognize(png(DARK_RED), None).await.unwrap();
        assert!(loose.is_recognized);
    }

    #[tokio::test]
    async fn test_recognize_negative_tolerance_is_validation_error() {
        let svc = service().await;
        let err = svc.recognize(png(RED), Some(-1.0)).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_recognize_does_not_mutate() {
        let svc = service().await;
        svc.register(png(RED), Some("Juan".into())).await.unwrap();
        svc.recognize(png(GREEN), None).await.unwrap();
        assert_eq!(svc.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recognize_no_face() {
        let svc = service().await;
        assert!(matches!(
            svc.recognize(png(BLACK), None).await,
            Err(ServiceError::NoFaceDetected)
        ));
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let svc = service().await;
        svc.register(png(RED), Some("Juan".into())).await.unwrap();
        svc.delete(FaceKey::Name("Juan".into())).await.unwrap();
        let err = svc.delete(FaceKey::Name("Juan".into())).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_invalidates_gallery() {
        let svc = service().await;
        let record = svc.register(png(RED), Some("Juan".into())).await.unwrap();
        assert!(svc.recognize(png(RED), None).await.unwrap().is_recognized);
        svc.delete(FaceKey::Id(record.id)).await.unwrap();
        assert!(!svc.recognize(png(RED), None).await.unwrap().is_recognized);
        // The face can be registered again after deletion.
        svc.register(png(RED), Some("Juan".into())).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_ordered_by_id() {
        let svc = service().await;
        svc.register(png(RED), Some("b".into())).await.unwrap();
        svc.register(png(GREEN), Some("a".into())).await.unwrap();
        let names: Vec<_> = svc.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_refresh_and_status() {
        let svc = service().await;
        let before = svc.status().await;
        assert!(before.database.connected);
        assert_eq!(before.database.stored_faces, Some(0));
        assert_eq!(before.loaded_faces, None);
        assert_eq!(before.embedding_dim, None);
        // Status never loads the gallery itself.
        assert_eq!(svc.status().await.loaded_faces, None);

        svc.register(png(RED), Some("Juan".into())).await.unwrap();
        assert_eq!(svc.refresh().await.unwrap(), 1);

        let after = svc.status().await;
        assert_eq!(after.loaded_faces, Some(1));
        assert_eq!(after.embedding_dim, Some(3));
        assert_eq!(after.tolerance, 0.5);
        assert!(!after.version.is_empty());
    }

    #[tokio::test]
    async fn test_contains() {
        let svc = service().await;
        assert!(!svc.contains("Juan").await.unwrap());
        svc.register(png(RED), Some("Juan".into())).await.unwrap();
        assert!(svc.contains("Juan").await.unwrap());
    }
}
