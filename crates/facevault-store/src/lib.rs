//! facevault-store — SQLite table of named face embeddings.
//!
//! Each row holds a unique name, the embedding as little-endian `f32` bytes,
//! and RFC 3339 timestamps. All embeddings in one store share a dimension.

mod schema;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use facevault_core::{Embedding, FaceRecord};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tokio_rusqlite::Connection;

pub use schema::SCHEMA_VERSION;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("a face named '{0}' already exists")]
    NameTaken(String),
    #[error("embedding has {actual} dimensions but stored faces have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("stored face {id} is corrupt: {reason}")]
    CorruptRow { id: i64, reason: String },
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lookup key for a stored face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceKey {
    Id(i64),
    Name(String),
}

impl fmt::Display for FaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceKey::Id(id) => write!(f, "id {id}"),
            FaceKey::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Row as read from SQLite, before embedding validation.
struct RawFace {
    id: i64,
    name: String,
    dim: i64,
    blob: Vec<u8>,
    created_at: String,
    updated_at: String,
}

impl RawFace {
    const COLUMNS: &'static str = "id, name, dim, embedding, created_at, updated_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            dim: row.get(2)?,
            blob: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> StoreResult<FaceRecord> {
        let corrupt = |reason: String| StoreError::CorruptRow { id: self.id, reason };
        if self.dim < 0 || self.blob.len() != self.dim as usize * 4 {
            return Err(corrupt(format!(
                "embedding blob is {} bytes, expected {} dimensions",
                self.blob.len(),
                self.dim
            )));
        }
        let embedding = Embedding::from_le_bytes(&self.blob)
            .ok_or_else(|| corrupt("embedding blob is not a whole number of f32 values".into()))?;

        Ok(FaceRecord {
            id: self.id,
            name: self.name,
            embedding,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

enum InsertOutcome {
    Inserted(RawFace),
    DimensionMismatch { expected: usize },
}

/// SQLite-backed face store.
///
/// Cheap to clone; clones share one background connection.
#[derive(Clone)]
pub struct FaceStore {
    conn: Connection,
}

impl FaceStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path.to_path_buf()).await?;
        Self::init(conn).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> StoreResult<Self> {
        conn.call(|conn| Ok(schema::apply_schema(conn)?)).await?;
        Ok(Self { conn })
    }

    /// Insert a new face. Fails with [`StoreError::NameTaken`] if the name
    /// exists and [`StoreError::DimensionMismatch`] if the embedding length
    /// differs from the faces already stored.
    pub async fn insert(&self, name: &str, embedding: &Embedding) -> StoreResult<FaceRecord> {
        let owned_name = name.to_string();
        let dim = embedding.dim();
        let blob = embedding.to_le_bytes();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<i64> = tx
                    .query_row("SELECT dim FROM faces LIMIT 1", [], |row| row.get(0))
                    .optional()?;
                if let Some(expected) = existing {
                    if expected as usize != dim {
                        return Ok(InsertOutcome::DimensionMismatch {
                            expected: expected as usize,
                        });
                    }
                }

                tx.execute(
                    "INSERT INTO faces (name, dim, embedding, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![owned_name, dim as i64, blob, now],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;

                Ok(InsertOutcome::Inserted(RawFace {
                    id,
                    name: owned_name,
                    dim: dim as i64,
                    blob,
                    created_at: now.clone(),
                    updated_at: now,
                }))
            })
            .await
            .map_err(|err| match err {
                tokio_rusqlite::Error::Rusqlite(ref e) if is_unique_violation(e) => {
                    StoreError::NameTaken(name.to_string())
                }
                other => StoreError::Database(other),
            })?;

        match outcome {
            InsertOutcome::Inserted(raw) => {
                let record = raw.into_record()?;
                tracing::debug!(id = record.id, name = %record.name, dim, "face inserted");
                Ok(record)
            }
            InsertOutcome::DimensionMismatch { expected } => Err(StoreError::DimensionMismatch {
                expected,
                actual: dim,
            }),
        }
    }

    /// All faces ordered by id.
    pub async fn list_all(&self) -> StoreResult<Vec<FaceRecord>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM faces ORDER BY id", RawFace::COLUMNS))?;
                let rows = stmt
                    .query_map([], RawFace::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(RawFace::into_record).collect()
    }

    /// Look up one face.
    pub async fn get(&self, key: &FaceKey) -> StoreResult<Option<FaceRecord>> {
        let key = key.clone();
        let row = self
            .conn
            .call(move |conn| {
                let sql = |col: &str| format!("SELECT {} FROM faces WHERE {col} = ?1", RawFace::COLUMNS);
                let row = match key {
                    FaceKey::Id(id) => conn
                        .query_row(&sql("id"), params![id], RawFace::from_row)
                        .optional()?,
                    FaceKey::Name(name) => conn
                        .query_row(&sql("name"), params![name], RawFace::from_row)
                        .optional()?,
                };
                Ok(row)
            })
            .await?;

        row.map(RawFace::into_record).transpose()
    }

    /// Delete one face. Returns `false` if nothing matched.
    pub async fn delete(&self, key: &FaceKey) -> StoreResult<bool> {
        let key = key.clone();
        let affected = self
            .conn
            .call(move |conn| {
                let n = match key {
                    FaceKey::Id(id) => conn.execute("DELETE FROM faces WHERE id = ?1", params![id])?,
                    FaceKey::Name(name) => {
                        conn.execute("DELETE FROM faces WHERE name = ?1", params![name])?
                    }
                };
                Ok(n)
            })
            .await?;
        Ok(affected > 0)
    }

    /// Number of stored faces.
    pub async fn count(&self) -> StoreResult<usize> {
        let n: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?))
            .await?;
        Ok(n as usize)
    }

    /// Round-trip a trivial query to confirm the connection is alive.
    pub async fn ping(&self) -> StoreResult<()> {
        self.conn
            .call(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(())
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
