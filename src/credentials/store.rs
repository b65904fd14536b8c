// dbkeeper/src/credentials/store.rs
use sqlx::FromRow;
use tracing::{info, warn};

use super::{Credential, CredentialId, EngineKind, NewCredential};
use crate::errors::{AppError, Result};
use crate::storage::{SqlitePool, Storage};

/// Row as stored; `type` stays text until it is checked against `EngineKind`.
#[derive(Debug, FromRow)]
struct CredentialRow {
    id: i64,
    name: String,
    #[sqlx(rename = "type")]
    engine: String,
    host: String,
    port: i64,
    username: String,
    password: String,
    database_name: String,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = AppError;

    fn try_from(row: CredentialRow) -> Result<Self> {
        let engine: EngineKind = row.engine.parse()?;
        let port = u16::try_from(row.port)
            .map_err(|_| AppError::Storage(format!("credential {} has invalid port {}", row.id, row.port)))?;
        Ok(Credential {
            id: row.id,
            name: row.name,
            engine,
            host: row.host,
            port,
            username: row.username,
            password: row.password,
            database_name: row.database_name,
        })
    }
}

const SELECT_CREDENTIALS: &str = "SELECT id, name, type, host, port, username, password, database_name FROM credentials";

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(storage: &Storage) -> Self {
        Self {
            pool: storage.pool().clone(),
        }
    }

    /// Validates and inserts a new credential. Returns its id.
    pub async fn add(&self, fields: &NewCredential) -> Result<CredentialId> {
        let valid = fields.validate()?;
        let result = sqlx::query(
            r#"
            INSERT INTO credentials (name, type, host, port, username, password, database_name)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&valid.name)
        .bind(valid.engine.as_str())
        .bind(&valid.host)
        .bind(i64::from(valid.port))
        .bind(&valid.username)
        .bind(&valid.password)
        .bind(&valid.database_name)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(
            credential_id = id,
            name = %valid.name,
            engine = %valid.engine,
            database = %valid.database_name,
            "credential added"
        );
        Ok(id)
    }

    /// Parses a connection URL and inserts the resulting credential.
    pub async fn add_from_url(&self, connection_url: &str, name: Option<&str>) -> Result<CredentialId> {
        let fields = NewCredential::from_connection_url(connection_url, name)?;
        self.add(&fields).await
    }

    /// All credentials in insertion order. Rows with an unsupported engine are skipped.
    pub async fn list(&self) -> Result<Vec<Credential>> {
        let rows: Vec<CredentialRow> = sqlx::query_as(&format!("{} ORDER BY id", SELECT_CREDENTIALS))
            .fetch_all(&self.pool)
            .await?;

        let mut credentials = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match Credential::try_from(row) {
                Ok(cred) => credentials.push(cred),
                Err(e) => warn!(credential_id = id, error = %e, "skipping unusable credential"),
            }
        }
        Ok(credentials)
    }

    /// First credential (in insertion order) whose database name matches.
    pub async fn get_by_database_name(&self, database_name: &str) -> Result<Option<Credential>> {
        let rows: Vec<CredentialRow> =
            sqlx::query_as(&format!("{} WHERE database_name = ? ORDER BY id", SELECT_CREDENTIALS))
                .bind(database_name)
                .fetch_all(&self.pool)
                .await?;

        if rows.len() > 1 {
            warn!(
                database = %database_name,
                matches = rows.len(),
                "several credentials share this database name; using the oldest"
            );
        }

        rows.into_iter().next().map(Credential::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> CredentialStore {
        let storage = Storage::in_memory().await.unwrap();
        CredentialStore::new(&storage)
    }

    fn fields(name: &str, engine: &str, database_name: &str) -> NewCredential {
        NewCredential {
            name: name.into(),
            engine: engine.into(),
            host: "db1".into(),
            port: "5432".into(),
            username: "a".into(),
            password: "x".into(),
            database_name: database_name.into(),
        }
    }

    #[tokio::test]
    async fn test_add_then_list_returns_fields_unchanged() {
        let store = store().await;
        let id = store.add(&fields("orders", "postgres", "orders_db")).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        let cred = &all[0];
        assert_eq!(cred.id, id);
        assert_eq!(cred.name, "orders");
        assert_eq!(cred.engine, EngineKind::Postgres);
        assert_eq!(cred.host, "db1");
        assert_eq!(cred.port, 5432);
        assert_eq!(cred.username, "a");
        assert_eq!(cred.password, "x");
        assert_eq!(cred.database_name, "orders_db");
    }

    #[tokio::test]
    async fn test_listed_fields_match_submitted_fields() {
        let store = store().await;
        let submitted = NewCredential {
            name: "Orders (prod)".into(),
            engine: "mysql".into(),
            host: "db2.internal".into(),
            port: "3307".into(),
            username: "backup user".into(),
            password: " p@ss word ".into(),
            database_name: "orders.v2".into(),
        };
        store.add(&submitted).await.unwrap();

        let got = store.list().await.unwrap().remove(0);
        assert_eq!(got.name, submitted.name);
        assert_eq!(got.engine.as_str(), submitted.engine);
        assert_eq!(got.host, submitted.host);
        assert_eq!(got.port.to_string(), submitted.port);
        assert_eq!(got.username, submitted.username);
        assert_eq!(got.password, submitted.password);
        assert_eq!(got.database_name, submitted.database_name);
    }

    #[tokio::test]
    async fn test_padded_fields_are_rejected_not_trimmed() {
        let store = store().await;
        let mut padded = fields("  Orders (prod) ", "postgres", "orders_db");
        padded.username = " a".into();
        assert!(matches!(store.add(&padded).await, Err(AppError::Validation(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_url_without_port_defaults_to_5432_for_every_engine() {
        let store = store().await;
        store.add_from_url("mysql://a:x@db2/shop", None).await.unwrap();
        let cred = store.get_by_database_name("shop").await.unwrap().unwrap();
        assert_eq!(cred.engine, EngineKind::Mysql);
        assert_eq!(cred.port, 5432);
    }

    #[tokio::test]
    async fn test_list_is_in_insertion_order() {
        let store = store().await;
        let a = store.add(&fields("b-first", "postgres", "zeta")).await.unwrap();
        let b = store.add(&fields("a-second", "mysql", "alpha")).await.unwrap();
        let ids: Vec<_> = store.list().await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(a < b);
    }

    #[tokio::test]
    async fn test_invalid_input_creates_no_row() {
        let store = store().await;
        assert!(matches!(
            store.add(&fields("x", "oracle", "orders_db")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store.add_from_url("postgres://a:x@db1", None).await,
            Err(AppError::Validation(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_from_url() {
        let store = store().await;
        let id = store
            .add_from_url("postgres://a:x@db1/orders_db", Some("orders"))
            .await
            .unwrap();
        let cred = store.get_by_database_name("orders_db").await.unwrap().unwrap();
        assert_eq!(cred.id, id);
        assert_eq!(cred.name, "orders");
        assert_eq!(cred.port, 5432);
    }

    #[tokio::test]
    async fn test_get_by_database_name_picks_first_match() {
        let store = store().await;
        let first = store.add(&fields("one", "postgres", "shared")).await.unwrap();
        store.add(&fields("two", "mysql", "shared")).await.unwrap();

        let cred = store.get_by_database_name("shared").await.unwrap().unwrap();
        assert_eq!(cred.id, first);
        assert!(store.get_by_database_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_engine_row() {
        let storage = Storage::in_memory().await.unwrap();
        let store = CredentialStore::new(&storage);
        sqlx::query(
            "INSERT INTO credentials (name, type, host, port, username, password, database_name) VALUES ('legacy', 'oracle', 'db9', 1521, 'a', 'x', 'ledger')",
        )
        .execute(storage.pool())
        .await
        .unwrap();
        store.add(&fields("orders", "postgres", "orders_db")).await.unwrap();

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["orders"]);
        assert!(matches!(
            store.get_by_database_name("ledger").await,
            Err(AppError::UnsupportedEngine(kind)) if kind == "oracle"
        ));
    }

    #[tokio::test]
    async fn test_ids_not_reused() {
        let storage = Storage::in_memory().await.unwrap();
        let store = CredentialStore::new(&storage);
        let first = store.add(&fields("one", "postgres", "a")).await.unwrap();
        sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(first)
            .execute(storage.pool())
            .await
            .unwrap();
        let second = store.add(&fields("two", "postgres", "b")).await.unwrap();
        assert!(second > first);
    }
}
