use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::db_restore::restore_command;
use crate::catalog::BackupCatalog;
use crate::credentials::{CredentialId, CredentialStore};
use crate::errors::{AppError, Result};
use crate::executor::{CommandRunner, ExecOptions};
use crate::utils::timestamp::artifact_file_name;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreOutcome {
    pub credential_id: CredentialId,
    pub database_name: String,
    pub artifact_name: String,
    pub restored_at: DateTime<Utc>,
}

/// Replays the artifact `{database_name}_{stamp}.sql` into the database it came from.
///
/// Success is decided by the restore tool's exit status alone. A failed restore may
/// have applied part of the artifact; nothing is rolled back here.
pub async fn perform_restore(
    runner: &dyn CommandRunner,
    credentials: &CredentialStore,
    catalog: &BackupCatalog,
    database_name: &str,
    stamp: &str,
) -> Result<RestoreOutcome> {
    let artifact_path = catalog.artifact_path(database_name, stamp).await?;

    let credential = credentials
        .get_by_database_name(database_name)
        .await?
        .ok_or_else(|| AppError::CredentialNotFound(database_name.to_string()))?;

    let artifact_name = artifact_file_name(database_name, stamp);
    info!(
        credential_id = credential.id,
        database = %database_name,
        artifact = %artifact_name,
        engine = %credential.engine,
        "starting restore"
    );

    let spec = restore_command(&credential, &artifact_path);
    if let Err(e) = runner.run(&spec, ExecOptions::discard_output()).await {
        error!(
            credential_id = credential.id,
            database = %database_name,
            artifact = %artifact_name,
            error = %e,
            "restore failed; the database may be partially restored"
        );
        return Err(e);
    }

    info!(database = %database_name, artifact = %artifact_name, "restore complete");
    Ok(RestoreOutcome {
        credential_id: credential.id,
        database_name: database_name.to_string(),
        artifact_name,
        restored_at: Utc::now(),
    })
}
