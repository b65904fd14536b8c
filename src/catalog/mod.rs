//! Backup catalog: the `backup_logs` table plus the artifact files on disk.
//!
//! An artifact and its log row are created together by [`BackupCatalog::store_backup`];
//! if either half fails the other is rolled back.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::credentials::{CredentialId, is_valid_database_name};
use crate::errors::{AppError, Result};
use crate::storage::{SqlitePool, Storage};
use crate::utils::timestamp::{artifact_file_name, is_valid_stamp, stamp_from_file_name, suffixed_stamp};

/// How many `-N` suffixes to try before giving up on a stamp.
const MAX_NAME_ATTEMPTS: u32 = 100;
const PARTIAL_PREFIX: &str = ".partial-";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupLogEntry {
    pub id: i64,
    pub credential_id: CredentialId,
    pub artifact_name: String,
    /// Completion time of the backup.
    pub backup_time: DateTime<Utc>,
    pub backup_size: u64,
}

/// Per-credential view joining the log with the files on disk. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRow {
    pub credential_id: CredentialId,
    pub name: String,
    #[serde(rename = "type")]
    pub engine: String,
    pub database_name: String,
    pub last_backup: Option<DateTime<Utc>>,
    pub total_size: u64,
    /// Stamps of the artifact files found for `database_name`, oldest first.
    pub artifacts: Vec<String>,
}

/// Result of [`BackupCatalog::store_backup`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBackup {
    pub entry: BackupLogEntry,
    /// Stamp the artifact was finally written under (may carry a `-N` suffix).
    pub stamp: String,
}

/// An artifact opened for reading.
#[derive(Debug)]
pub struct ArtifactDownload {
    pub artifact_name: String,
    pub size_bytes: u64,
    pub file: tokio::fs::File,
}

#[derive(FromRow)]
struct LogRow {
    id: i64,
    credential_id: i64,
    artifact_name: String,
    backup_time: String,
    backup_size: i64,
}

#[derive(FromRow)]
struct CatalogQueryRow {
    credential_id: i64,
    name: String,
    #[sqlx(rename = "type")]
    engine: String,
    database_name: String,
    last_backup: Option<String>,
    total_size: i64,
}

#[derive(Clone)]
pub struct BackupCatalog {
    pool: SqlitePool,
    artifact_dir: PathBuf,
}

impl BackupCatalog {
    pub fn new(storage: &Storage, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool: storage.pool().clone(),
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Creates the artifact directory if it does not exist yet.
    pub async fn ensure_artifact_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.artifact_dir).await?;
        Ok(())
    }

    /// Writes `contents` as a new artifact and records its log entry.
    ///
    /// The artifact is named `{database_name}_{stamp}.sql`; if that name is taken a
    /// `-N` suffix is appended rather than overwriting the existing file.
    pub async fn store_backup(
        &self,
        credential_id: CredentialId,
        database_name: &str,
        stamp: &str,
        contents: Vec<u8>,
    ) -> Result<StoredBackup> {
        self.ensure_artifact_dir().await?;

        let dir = self.artifact_dir.clone();
        let db = database_name.to_string();
        let base_stamp = stamp.to_string();
        let written = tokio::task::spawn_blocking(move || write_artifact(&dir, &db, &base_stamp, &contents)).await??;

        let backup_time = Utc::now().trunc_subsecs(0);
        let insert = sqlx::query(
            "INSERT INTO backup_logs (credential_id, artifact_name, backup_time, backup_size) VALUES (?, ?, ?, ?)",
        )
        .bind(credential_id)
        .bind(&written.artifact_name)
        .bind(format_time(backup_time))
        .bind(i64::try_from(written.size).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await;

        match insert {
            Ok(result) => {
                info!(
                    credential_id,
                    artifact = %written.artifact_name,
                    size_bytes = written.size,
                    "backup recorded"
                );
                Ok(StoredBackup {
                    entry: BackupLogEntry {
                        id: result.last_insert_rowid(),
                        credential_id,
                        artifact_name: written.artifact_name,
                        backup_time,
                        backup_size: written.size,
                    },
                    stamp: written.stamp,
                })
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&written.path).await {
                    warn!(path = %written.path.display(), error = %rm, "failed to remove unrecorded artifact");
                }
                Err(e.into())
            }
        }
    }

    /// All log entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<BackupLogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT id, credential_id, artifact_name, backup_time, backup_size FROM backup_logs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BackupLogEntry::try_from).collect()
    }

    /// One row per credential: last backup, cumulative size and the artifacts on disk.
    pub async fn list_catalog(&self) -> Result<Vec<CatalogRow>> {
        let rows: Vec<CatalogQueryRow> = sqlx::query_as(
            r#"
            SELECT c.id AS credential_id, c.name, c.type, c.database_name,
                   MAX(b.backup_time) AS last_backup,
                   COALESCE(SUM(b.backup_size), 0) AS total_size
            FROM credentials c
            LEFT JOIN backup_logs b ON c.id = b.credential_id
            GROUP BY c.id
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let file_names = self.artifact_file_names().await?;

        rows.into_iter()
            .map(|row| -> Result<CatalogRow> {
                let last_backup = row.last_backup.as_deref().map(parse_time).transpose()?;
                let mut artifacts: Vec<String> = file_names
                    .iter()
                    .filter_map(|f| stamp_from_file_name(&row.database_name, f))
                    .map(str::to_string)
                    .collect();
                artifacts.sort();
                Ok(CatalogRow {
                    credential_id: row.credential_id,
                    name: row.name,
                    engine: row.engine,
                    database_name: row.database_name,
                    last_backup,
                    total_size: u64::try_from(row.total_size).unwrap_or(0),
                    artifacts,
                })
            })
            .collect()
    }

    /// Stamps of the artifacts on disk for `database_name`, oldest first.
    pub async fn artifact_stamps(&self, database_name: &str) -> Result<Vec<String>> {
        let mut stamps: Vec<String> = self
            .artifact_file_names()
            .await?
            .iter()
            .filter_map(|f| stamp_from_file_name(database_name, f))
            .map(str::to_string)
            .collect();
        stamps.sort();
        Ok(stamps)
    }

    /// Resolves `{database_name}_{stamp}.sql`, failing with `ArtifactNotFound` if it does not exist.
    pub async fn artifact_path(&self, database_name: &str, stamp: &str) -> Result<PathBuf> {
        let not_found = || AppError::ArtifactNotFound(format!("{}_{}", database_name, stamp));

        if !is_valid_database_name(database_name) || !is_valid_stamp(stamp) {
            return Err(not_found());
        }
        let path = self.artifact_dir.join(artifact_file_name(database_name, stamp));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Opens an artifact for streaming to a caller.
    pub async fn open_artifact(&self, database_name: &str, stamp: &str) -> Result<ArtifactDownload> {
        let path = self.artifact_path(database_name, stamp).await?;
        let file = tokio::fs::File::open(&path).await?;
        let size_bytes = file.metadata().await?.len();
        debug!(path = %path.display(), size_bytes, "artifact opened");
        Ok(ArtifactDownload {
            artifact_name: artifact_file_name(database_name, stamp),
            size_bytes,
            file,
        })
    }

    async fn artifact_file_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.artifact_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with(PARTIAL_PREFIX) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

struct WrittenArtifact {
    stamp: String,
    artifact_name: String,
    path: PathBuf,
    size: u64,
}

fn write_artifact(dir: &Path, database_name: &str, stamp: &str, contents: &[u8]) -> Result<WrittenArtifact> {
    let mut tmp = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let final_stamp = suffixed_stamp(stamp, attempt);
        let artifact_name = artifact_file_name(database_name, &final_stamp);
        let path = dir.join(&artifact_name);
        match tmp.persist_noclobber(&path) {
            Ok(file) => {
                let size = file.metadata()?.len();
                if attempt > 0 {
                    warn!(artifact = %artifact_name, "artifact name taken, wrote with suffix");
                }
                return Ok(WrittenArtifact {
                    stamp: final_stamp,
                    artifact_name,
                    path,
                    size,
                });
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(e.error.into()),
        }
    }
    Err(AppError::ArtifactCollision(artifact_file_name(database_name, stamp)))
}

impl TryFrom<LogRow> for BackupLogEntry {
    type Error = AppError;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(BackupLogEntry {
            id: row.id,
            credential_id: row.credential_id,
            artifact_name: row.artifact_name,
            backup_time: parse_time(&row.backup_time)?,
            backup_size: u64::try_from(row.backup_size).unwrap_or(0),
        })
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Storage(format!("invalid backup_time '{}': {}", raw, e)))
}
