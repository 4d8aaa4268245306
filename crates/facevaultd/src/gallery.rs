use std::sync::Arc;

use facevault_core::FaceRecord;
use facevault_store::{FaceStore, StoreResult};
use tokio::sync::RwLock;

/// Cached snapshot of every stored face.
///
/// Loaded lazily from the store and dropped on every write, so the next
/// reader sees committed rows. Readers share one `Arc` and never block
/// each other once the snapshot is warm.
#[derive(Default)]
pub struct Gallery {
    snapshot: RwLock<Option<Arc<Vec<FaceRecord>>>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, loading it from `store` if it was invalidated.
    pub async fn snapshot(&self, store: &FaceStore) -> StoreResult<Arc<Vec<FaceRecord>>> {
        if let Some(faces) = self.snapshot.read().await.as_ref() {
            return Ok(Arc::clone(faces));
        }

        let mut guard = self.snapshot.write().await;
        // Another task may have loaded it while we waited for the lock.
        if let Some(faces) = guard.as_ref() {
            return Ok(Arc::clone(faces));
        }
        let faces = Arc::new(store.list_all().await?);
        tracing::debug!(count = faces.len(), "gallery loaded");
        *guard = Some(Arc::clone(&faces));
        Ok(faces)
    }

    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
    }

    /// The cached snapshot, without loading it.
    pub async fn cached(&self) -> Option<Arc<Vec<FaceRecord>>> {
        self.snapshot.read().await.clone()
    }
}
