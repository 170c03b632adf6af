//! Registry of known faces: identity → reference embeddings.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use facekit_core::{open_image, Embedding, Encoder, EncoderError, Gallery, UNKNOWN_IDENTITY};
use image::DynamicImage;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS reference_faces (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    identity   TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    source_ref TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (identity, embedding)
);
CREATE INDEX IF NOT EXISTS idx_reference_faces_identity ON reference_faces(identity);
"#;

const ENTRY_COLUMNS: &str = "id, identity, embedding, source_ref, created_at";

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One registered face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceEntry {
    pub id: Uuid,
    pub identity: String,
    pub embedding: Embedding,
    pub source_image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row as stored, before validation.
struct RawEntry {
    id: String,
    identity: String,
    embedding: Vec<u8>,
    source_ref: Option<String>,
    created_at: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            identity: row.get(1)?,
            embedding: row.get(2)?,
            source_ref: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl TryFrom<RawEntry> for ReferenceEntry {
    type Error = StoreError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&raw.id)
            .map_err(|e| StoreError::Corrupt(format!("entry id {:?}: {e}", raw.id)))?;
        let embedding = decode_embedding(&raw.identity, &raw.embedding)?;
        let created_at = DateTime::parse_from_rfc3339(&raw.created_at)
            .map_err(|e| StoreError::Corrupt(format!("entry {id} created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Self {
            id,
            identity: raw.identity,
            embedding,
            source_image_ref: raw.source_ref,
            created_at,
        })
    }
}

/// Outcome of a directory import.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub imported: Vec<ReferenceEntry>,
    /// Images in which no face was found.
    pub skipped: Vec<PathBuf>,
    /// Images that could not be decoded, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// SQLite-backed face registry.
pub struct Registry {
    conn: Mutex<Connection>,
}

impl Registry {
    /// Open (or create) the registry in a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = crate::open_connection(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Unavailable)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL).map_err(StoreError::Unavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load every reference embedding in registration order.
    pub fn load(&self) -> Result<Gallery, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT identity, embedding FROM reference_faces ORDER BY seq")
            .map_err(StoreError::Unavailable)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .map_err(StoreError::Unavailable)?;

        let mut gallery = Gallery::new();
        for row in rows {
            let (identity, blob) = row.map_err(StoreError::Unavailable)?;
            let embedding = decode_embedding(&identity, &blob)?;
            gallery.push(identity, embedding);
        }

        tracing::info!(entries = gallery.len(), "registry loaded");
        Ok(gallery)
    }

    /// Register the first face found in `image` under `identity`.
    ///
    /// Registration photos should contain one face; when several are found
    /// the encoder's first is used. Already-loaded galleries are not
    /// updated; reload to see the new entry.
    pub fn add<E: Encoder + ?Sized>(
        &self,
        encoder: &mut E,
        identity: &str,
        image: &DynamicImage,
        source_ref: Option<&str>,
    ) -> Result<ReferenceEntry, StoreError> {
        let identity = validate_identity(identity)?;
        let mut faces = encoder.detect_and_encode(image)?.into_iter();
        let first = faces.next().ok_or(StoreError::NoFaceDetected)?;

        let extra = faces.count();
        if extra > 0 {
            tracing::warn!(
                identity,
                faces = extra + 1,
                "registration image has several faces; using the first"
            );
        }

        self.insert(identity, first.embedding, source_ref)
    }

    /// Persist a precomputed embedding.
    ///
    /// Re-registering an identical (identity, embedding) pair returns the
    /// existing entry instead of writing a duplicate.
    pub fn insert(
        &self,
        identity: &str,
        embedding: Embedding,
        source_ref: Option<&str>,
    ) -> Result<ReferenceEntry, StoreError> {
        let identity = validate_identity(identity)?;
        let blob = embedding.to_le_bytes();

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::Persistence)?;

        let existing = tx
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM reference_faces WHERE identity = ?1 AND embedding = ?2"),
                params![identity, blob],
                RawEntry::from_row,
            )
            .optional()
            .map_err(StoreError::Persistence)?;
        if let Some(raw) = existing {
            tracing::debug!(identity, id = %raw.id, "embedding already registered");
            return ReferenceEntry::try_from(raw);
        }

        let entry = ReferenceEntry {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            embedding,
            source_image_ref: source_ref.map(str::to_owned),
            created_at: Utc::now(),
        };
        tx.execute(
            &format!("INSERT INTO reference_faces ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                entry.id.to_string(),
                entry.identity,
                blob,
                entry.source_image_ref,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::Persistence)?;
        tx.commit().map_err(StoreError::Persistence)?;

        tracing::info!(identity, id = %entry.id, dim = entry.embedding.len(), "face registered");
        Ok(entry)
    }

    /// All entries in registration order.
    pub fn list(&self) -> Result<Vec<ReferenceEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {ENTRY_COLUMNS} FROM reference_faces ORDER BY seq"))
            .map_err(StoreError::Unavailable)?;
        let rows = stmt
            .query_map([], RawEntry::from_row)
            .map_err(StoreError::Unavailable)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(ReferenceEntry::try_from(row.map_err(StoreError::Unavailable)?)?);
        }
        Ok(entries)
    }

    /// Distinct identities, ordered by first registration.
    pub fn identities(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT identity FROM reference_faces GROUP BY identity ORDER BY MIN(seq)")
            .map_err(StoreError::Unavailable)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::Unavailable)?;
        let identities = rows
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(StoreError::Unavailable)?;
        Ok(identities)
    }

    /// Remove every entry registered under `identity`. Returns the count removed.
    pub fn remove(&self, identity: &str) -> Result<usize, StoreError> {
        let identity = identity.trim();
        let removed = self
            .conn()
            .execute("DELETE FROM reference_faces WHERE identity = ?1", params![identity])
            .map_err(StoreError::Persistence)?;
        tracing::info!(identity, removed, "identity removed");
        Ok(removed)
    }

    /// Register every `.jpg`, `.jpeg` and `.png` file in `dir`, named by
    /// file stem. Files are visited in name order.
    pub fn import_dir<E: Encoder + ?Sized>(
        &self,
        encoder: &mut E,
        dir: &Path,
    ) -> Result<ImportReport, StoreError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        let mut report = ImportReport::default();
        for path in paths {
            let Some(identity) = path.file_stem().and_then(|s| s.to_str()) else {
                report.failed.push((path.clone(), "file name is not valid UTF-8".into()));
                continue;
            };

            let image = match open_image(&path) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    report.failed.push((path.clone(), e.to_string()));
                    continue;
                }
            };

            let source_ref = path.to_string_lossy();
            match self.add(encoder, identity, &image, Some(source_ref.as_ref())) {
                Ok(entry) => report.imported.push(entry),
                Err(StoreError::NoFaceDetected) => {
                    tracing::warn!(path = %path.display(), "no face found; skipping");
                    report.skipped.push(path.clone());
                }
                Err(StoreError::Encoder(EncoderError::Decode(reason)))
                | Err(StoreError::InvalidIdentity(reason)) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping image");
                    report.failed.push((path.clone(), reason));
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            dir = %dir.display(),
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "directory import finished"
        );
        Ok(report)
    }
}

fn validate_identity(identity: &str) -> Result<&str, StoreError> {
    let trimmed = identity.trim();
    if trimmed.is_empty() || trimmed == UNKNOWN_IDENTITY {
        return Err(StoreError::InvalidIdentity(identity.to_string()));
    }
    Ok(trimmed)
}

fn decode_embedding(identity: &str, blob: &[u8]) -> Result<Embedding, StoreError> {
    Embedding::from_le_bytes(blob).ok_or_else(|| {
        StoreError::Corrupt(format!(
            "embedding for {identity:?} is {} bytes, not a multiple of 8",
            blob.len()
        ))
    })
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}
