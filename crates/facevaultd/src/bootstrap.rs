//! Startup registration of reference photos.

use std::path::{Path, PathBuf};

use crate::service::{FaceService, ServiceError};

const PHOTO_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub registered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Register every photo in `dir` under its file stem.
///
/// Names that already exist are skipped. A photo that cannot be registered
/// is logged and counted, never fatal. Only failing to read the directory
/// itself is an error.
pub async fn enroll_directory(
    service: &FaceService,
    dir: &Path,
) -> std::io::Result<BootstrapSummary> {
    let mut summary = BootstrapSummary::default();
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "reference directory not found; skipping bootstrap");
        return Ok(summary);
    }

    for path in photo_paths(dir).await? {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            tracing::warn!(path = %path.display(), "skipping photo with non-UTF-8 name");
            summary.failed += 1;
            continue;
        };

        match service.contains(&name).await {
            Ok(true) => {
                tracing::debug!(name = %name, "reference already registered");
                summary.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "reference lookup failed");
                summary.failed += 1;
                continue;
            }
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read reference photo");
                summary.failed += 1;
                continue;
            }
        };

        match service.register(bytes, Some(name.clone())).await {
            Ok(record) => {
                tracing::info!(id = record.id, name = %record.name, "reference photo registered");
                summary.registered += 1;
            }
            Err(ServiceError::NameTaken(_)) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), code = e.code(), error = %e, "reference photo rejected");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        dir = %dir.display(),
        registered = summary.registered,
        skipped = summary.skipped,
        failed = summary.failed,
        "reference bootstrap complete"
    );
    Ok(summary)
}

/// Photo files directly inside `dir`, sorted by path.
async fn photo_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && is_photo(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
