// dbkeeper/src/backup/db_dump.rs
use crate::credentials::{Credential, EngineKind};
use crate::executor::CommandSpec;

pub const PG_DUMP: &str = "pg_dump";
pub const MYSQLDUMP: &str = "mysqldump";

/// Builds the logical dump command for a credential. The dump is written to stdout.
///
/// Passwords go through `PGPASSWORD` / `MYSQL_PWD` on the child, never on the command line.
pub fn dump_command(credential: &Credential) -> CommandSpec {
    match credential.engine {
        EngineKind::Postgres => CommandSpec::new(PG_DUMP)
            .arg("--host")
            .arg(&credential.host)
            .arg("--port")
            .arg(credential.port.to_string())
            .arg("--username")
            .arg(&credential.username)
            .arg("--no-password")
            .arg(&credential.database_name)
            .secret_env("PGPASSWORD", &credential.password),
        EngineKind::Mysql => CommandSpec::new(MYSQLDUMP)
            .arg("--host")
            .arg(&credential.host)
            .arg("--port")
            .arg(credential.port.to_string())
            .arg("--user")
            .arg(&credential.username)
            .arg("--single-transaction")
            .arg("--routines")
            .arg(&credential.database_name)
            .secret_env("MYSQL_PWD", &credential.password),
    }
}
