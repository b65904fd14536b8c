use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::db_dump::dump_command;
use crate::catalog::BackupCatalog;
use crate::credentials::{Credential, CredentialId};
use crate::errors::{AppError, Result};
use crate::executor::{CommandRunner, ExecOptions};
use crate::utils::timestamp::backup_stamp;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupOutcome {
    pub credential_id: CredentialId,
    pub database_name: String,
    pub artifact_name: String,
    /// Stamp identifying the artifact for download and restore.
    pub timestamp: String,
    pub size_bytes: u64,
    pub completed_at: DateTime<Utc>,
}

/// Dumps one credential's database and records the artifact.
///
/// 1. Stamp the start time.
/// 2. Build the engine's dump command.
/// 3. Run it, capturing stdout up to `max_output_bytes`.
/// 4. Reject empty or whitespace-only output.
/// 5. Persist the artifact and its log entry together.
///
/// Nothing is written unless the dump succeeded with content. No retries.
pub async fn perform_backup(
    runner: &dyn CommandRunner,
    catalog: &BackupCatalog,
    credential: &Credential,
    max_output_bytes: usize,
) -> Result<BackupOutcome> {
    let started_at = Utc::now();
    let stamp = backup_stamp(started_at);
    info!(
        credential_id = credential.id,
        database = %credential.database_name,
        engine = %credential.engine,
        stamp = %stamp,
        "starting backup"
    );

    let spec = dump_command(credential);
    let output = match runner.run(&spec, ExecOptions::capture(max_output_bytes)).await {
        Ok(output) => output,
        Err(e) => {
            error!(
                credential_id = credential.id,
                database = %credential.database_name,
                error = %e,
                "backup failed"
            );
            return Err(e);
        }
    };

    debug!(
        database = %credential.database_name,
        exit_code = ?output.exit_code,
        captured_bytes = output.stdout.len(),
        "dump finished"
    );

    if output.stdout.iter().all(u8::is_ascii_whitespace) {
        warn!(
            credential_id = credential.id,
            database = %credential.database_name,
            "dump succeeded but produced no content; nothing recorded"
        );
        return Err(AppError::EmptyBackup(credential.database_name.clone()));
    }

    let stored = catalog
        .store_backup(credential.id, &credential.database_name, &stamp, output.stdout)
        .await?;
    let entry = stored.entry;

    info!(
        credential_id = credential.id,
        artifact = %entry.artifact_name,
        size_bytes = entry.backup_size,
        elapsed_ms = (entry.backup_time - started_at).num_milliseconds().max(0),
        "backup complete"
    );

    Ok(BackupOutcome {
        credential_id: credential.id,
        database_name: credential.database_name.clone(),
        artifact_name: entry.artifact_name,
        timestamp: stored.stamp,
        size_bytes: entry.backup_size,
        completed_at: entry.backup_time,
    })
}
