// dbkeeper/src/restore/db_restore.rs
use std::path::Path;

use crate::credentials::{Credential, EngineKind};
use crate::executor::CommandSpec;

pub const PSQL: &str = "psql";
pub const MYSQL: &str = "mysql";

/// Builds the command that replays a plain SQL artifact into the credential's database.
///
/// The artifact is fed on stdin. `psql` stops at the first failing statement so a
/// broken restore exits non-zero instead of silently skipping errors.
pub fn restore_command(credential: &Credential, artifact_path: &Path) -> CommandSpec {
    match credential.engine {
        EngineKind::Postgres => CommandSpec::new(PSQL)
            .arg("--no-psqlrc")
            .arg("--quiet")
            .arg("--set")
            .arg("ON_ERROR_STOP=1")
            .arg("--host")
            .arg(&credential.host)
            .arg("--port")
            .arg(credential.port.to_string())
            .arg("--username")
            .arg(&credential.username)
            .arg("--no-password")
            .arg("--dbname")
            .arg(&credential.database_name)
            .secret_env("PGPASSWORD", &credential.password)
            .stdin_file(artifact_path),
        EngineKind::Mysql => CommandSpec::new(MYSQL)
            .arg("--host")
            .arg(&credential.host)
            .arg("--port")
            .arg(credential.port.to_string())
            .arg("--user")
            .arg(&credential.username)
            .arg(&credential.database_name)
            .secret_env("MYSQL_PWD", &credential.password)
            .stdin_file(artifact_path),
    }
}
