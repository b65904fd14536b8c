//! Operations offered to the presentation layer (web UI, CLI).
//!
//! `BackupService` is cheap to clone; every clone shares the same stores, runner
//! and backup slots. Dumps and restores hold a slot while the external tool runs,
//! which bounds how many run at once across scheduled and on-demand callers.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::backup::{BackupOutcome, perform_backup};
use crate::catalog::{ArtifactDownload, BackupCatalog, CatalogRow};
use crate::config::AppConfig;
use crate::credentials::{Credential, CredentialId, CredentialStore, NewCredential};
use crate::errors::{AppError, Result};
use crate::executor::CommandRunner;
use crate::restore::{RestoreOutcome, perform_restore};
use crate::storage::Storage;

#[derive(Clone)]
pub struct BackupService {
    credentials: CredentialStore,
    catalog: BackupCatalog,
    runner: Arc<dyn CommandRunner>,
    slots: Arc<Semaphore>,
    max_output_bytes: usize,
}

impl BackupService {
    pub fn new(
        storage: &Storage,
        artifact_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        max_output_bytes: usize,
        max_concurrent_backups: usize,
    ) -> Self {
        Self {
            credentials: CredentialStore::new(storage),
            catalog: BackupCatalog::new(storage, artifact_dir),
            runner,
            slots: Arc::new(Semaphore::new(max_concurrent_backups.max(1))),
            max_output_bytes,
        }
    }

    pub fn from_config(storage: &Storage, config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            storage,
            config.artifact_dir.clone(),
            runner,
            config.max_output_bytes,
            config.max_concurrent_backups,
        )
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    pub async fn list_credentials(&self) -> Result<Vec<Credential>> {
        self.credentials.list().await
    }

    pub async fn add_credential(&self, fields: &NewCredential) -> Result<CredentialId> {
        self.credentials.add(fields).await
    }

    pub async fn add_credential_from_url(&self, connection_url: &str, name: Option<&str>) -> Result<CredentialId> {
        self.credentials.add_from_url(connection_url, name).await
    }

    /// Backs up one credential, waiting for a free slot first.
    pub async fn backup_one(&self, credential: &Credential) -> Result<BackupOutcome> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| AppError::Storage("backup slots are closed".into()))?;
        perform_backup(self.runner.as_ref(), &self.catalog, credential, self.max_output_bytes).await
    }

    /// On-demand backup by database name.
    pub async fn backup_database(&self, database_name: &str) -> Result<BackupOutcome> {
        let credential = self
            .credentials
            .get_by_database_name(database_name)
            .await?
            .ok_or_else(|| AppError::CredentialNotFound(database_name.to_string()))?;
        self.backup_one(&credential).await
    }

    /// Runs `backup_one` in the background; await the handle for the outcome.
    pub fn spawn_backup(&self, credential: Credential) -> JoinHandle<Result<BackupOutcome>> {
        let service = self.clone();
        tokio::spawn(async move { service.backup_one(&credential).await })
    }

    pub async fn list_catalog(&self) -> Result<Vec<CatalogRow>> {
        self.catalog.list_catalog().await
    }

    pub async fn download_artifact(&self, database_name: &str, timestamp: &str) -> Result<ArtifactDownload> {
        self.catalog.open_artifact(database_name, timestamp).await
    }

    pub async fn restore(&self, database_name: &str, timestamp: &str) -> Result<RestoreOutcome> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| AppError::Storage("backup slots are closed".into()))?;
        perform_restore(
            self.runner.as_ref(),
            &self.credentials,
            &self.catalog,
            database_name,
            timestamp,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Fixture, StubRunner, credential_for, orders_credential};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn service(fx: &Fixture, runner: Arc<StubRunner>, slots: usize) -> BackupService {
        BackupService::new(&fx.storage, fx.dir.path().join("dumps"), runner, 1 << 20, slots)
    }

    #[tokio::test]
    async fn test_orders_scenario() {
        let fx = Fixture::new().await;
        let runner = Arc::new(StubRunner::with_stdout(b"-- dump content --\n"));
        let svc = service(&fx, runner.clone(), 2);

        let id = svc.add_credential(&orders_credential()).await.unwrap();
        let outcome = svc.backup_database("orders_db").await.unwrap();

        assert_eq!(outcome.credential_id, id);
        assert_eq!(outcome.size_bytes, 19);
        assert_eq!(outcome.artifact_name, format!("orders_db_{}.sql", outcome.timestamp));
        let on_disk = std::fs::metadata(svc.catalog().artifact_dir().join(&outcome.artifact_name)).unwrap();
        assert_eq!(on_disk.len(), 19);

        let entries = svc.catalog().entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].credential_id, id);
        assert_eq!(entries[0].backup_size, 19);

        let rows = svc.list_catalog().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_size, 19);
        assert_eq!(rows[0].artifacts, vec![outcome.timestamp.clone()]);
        assert!(rows[0].last_backup.is_some());
    }

    #[tokio::test]
    async fn test_failed_backup_leaves_catalog_unchanged() {
        let fx = Fixture::new().await;
        let runner = Arc::new(StubRunner::failing(1, "pg_dump: connection refused"));
        let svc = service(&fx, runner, 2);
        svc.add_credential(&orders_credential()).await.unwrap();

        let err = svc.backup_database("orders_db").await.unwrap_err();
        assert!(matches!(err, AppError::Process { .. }));

        let rows = svc.list_catalog().await.unwrap();
        assert_eq!(rows[0].last_backup, None);
        assert_eq!(rows[0].total_size, 0);
        assert!(rows[0].artifacts.is_empty());
        assert!(svc.catalog().entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backup_unknown_database() {
        let fx = Fixture::new().await;
        let runner = Arc::new(StubRunner::with_stdout(b"x"));
        let svc = service(&fx, runner.clone(), 2);

        let err = svc.backup_database("nope").await.unwrap_err();
        assert!(matches!(err, AppError::CredentialNotFound(db) if db == "nope"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backup_of_unsupported_engine_row() {
        let fx = Fixture::new().await;
        let runner = Arc::new(StubRunner::with_stdout(b"x"));
        let svc = service(&fx, runner.clone(), 2);
        sqlx::query(
            "INSERT INTO credentials (name, type, host, port, username, password, database_name) VALUES ('legacy', 'mssql', 'db9', 1433, 'a', 'x', 'ledger')",
        )
        .execute(fx.storage.pool())
        .await
        .unwrap();

        let err = svc.backup_database("ledger").await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedEngine(kind) if kind == "mssql"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_download_round_trip_and_not_found() {
        let fx = Fixture::new().await;
        let runner = Arc::new(StubRunner::with_stdout(b"-- dump content --\n"));
        let svc = service(&fx, runner, 2);
        svc.add_credential(&orders_credential()).await.unwrap();
        let outcome = svc.backup_database("orders_db").await.unwrap();

        let mut download = svc.download_artifact("orders_db", &outcome.timestamp).await.unwrap();
        let mut bytes = Vec::new();
        download.file.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"-- dump content --\n");
        assert_eq!(download.artifact_name, outcome.artifact_name);

        assert!(matches!(
            svc.download_artifact("orders_db", "19990101T000000").await,
            Err(AppError::ArtifactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_after_backup() {
        let fx = Fixture::new().await;
        let runner = Arc::new(StubRunner::with_stdout(b"-- dump content --\n"));
        let svc = service(&fx, runner.clone(), 2);
        svc.add_credential(&orders_credential()).await.unwrap();
        let backup = svc.backup_database("orders_db").await.unwrap();

        let restored = svc.restore("orders_db", &backup.timestamp).await.unwrap();
        assert_eq!(restored.artifact_name, backup.artifact_name);
        let calls = runner.calls();
        let expected = svc.catalog().artifact_dir().join(&backup.artifact_name);
        assert_eq!(calls[1].0.stdin_file.as_deref(), Some(expected.as_path()));
    }

    #[tokio::test]
    async fn test_spawned_backups_respect_slot_limit() {
        let fx = Fixture::new().await;
        let runner = Arc::new(StubRunner::with_stdout(b"data\n").with_delay(Duration::from_millis(50)));
        let svc = service(&fx, runner.clone(), 2);
        for i in 0..5 {
            svc.add_credential(&credential_for(&format!("c{i}"), "postgres", &format!("db{i}")))
                .await
                .unwrap();
        }

        let handles: Vec<_> = svc
            .list_credentials()
            .await
            .unwrap()
            .into_iter()
            .map(|c| svc.spawn_backup(c))
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(runner.calls().len(), 5);
        assert!(runner.max_in_flight() <= 2);
        assert_eq!(svc.catalog().entries().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_add_credential_from_url_rejects_malformed() {
        let fx = Fixture::new().await;
        let svc = service(&fx, Arc::new(StubRunner::with_stdout(b"")), 1);
        assert!(matches!(
            svc.add_credential_from_url("postgres://", None).await,
            Err(AppError::Validation(_))
        ));
        assert!(svc.list_credentials().await.unwrap().is_empty());

        svc.add_credential_from_url("mysql://root:pw@db2:3306/shop", Some("Shop"))
            .await
            .unwrap();
        let all = svc.list_credentials().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Shop");
    }
}
