//! SQL DDL for the credential catalog and the backup log.

/// SQLite schema:
/// - `credentials.id` uses AUTOINCREMENT so ids are never handed out twice
/// - `backup_logs.artifact_name` is UNIQUE; one log row per artifact file
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    username TEXT NOT NULL,
    password TEXT NOT NULL,
    database_name TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credentials_database_name ON credentials(database_name);

CREATE TABLE IF NOT EXISTS backup_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    credential_id INTEGER NOT NULL,
    artifact_name TEXT NOT NULL UNIQUE,
    backup_time TEXT NOT NULL, -- RFC3339, UTC, second precision
    backup_size INTEGER NOT NULL,
    FOREIGN KEY (credential_id) REFERENCES credentials(id)
);

CREATE INDEX IF NOT EXISTS idx_backup_logs_credential_id ON backup_logs(credential_id);
"#;
