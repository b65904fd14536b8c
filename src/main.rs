//! dbkeeper: scheduled and on-demand backups of PostgreSQL and MySQL databases
//!
//! Provides a CLI over the backup service; `run` arms the recurring schedule

mod backup;
mod catalog;
mod config;
mod credentials;
mod errors;
mod executor;
mod restore;
mod scheduler;
mod service;
mod storage;
mod utils;

#[cfg(test)]
mod test_utils;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use credentials::NewCredential;
use executor::ProcessRunner;
use scheduler::BackupScheduler;
use service::BackupService;
use storage::Storage;

const USAGE: &str = "usage: dbkeeper [run | add <connection-url> [name] | add <name> <type> <host> <port> <username> <database> | list | backup <database> | backup-all | catalog | log | artifacts <database> | download <database> <timestamp> <dest-file> | restore <database> <timestamp>]";

/// Password for the explicit-fields form of `add`; kept off the command line.
const PASSWORD_ENV: &str = "DBKEEPER_CREDENTIAL_PASSWORD";

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config_path = PathBuf::from("config.json");
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run_app(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_app(config: AppConfig) -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("run");

    let storage = Storage::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database_url))?;
    let service = BackupService::from_config(&storage, &config, Arc::new(ProcessRunner::new()));
    service
        .catalog()
        .ensure_artifact_dir()
        .await
        .with_context(|| format!("Failed to create artifact directory {}", config.artifact_dir.display()))?;

    let result = dispatch(command, &args[args.len().min(1)..], &config, &service).await;
    storage.close().await;
    result
}

async fn dispatch(command: &str, rest: &[String], config: &AppConfig, service: &BackupService) -> Result<()> {
    match (command, rest) {
        ("run", []) => {
            let schedule = config.schedule()?;
            info!(
                schedule = %config.backup_schedule,
                artifact_dir = %service.catalog().artifact_dir().display(),
                "starting dbkeeper"
            );
            let handle = BackupScheduler::new(service.clone(), schedule).start();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("shutdown requested");
            handle.shutdown().await;
            Ok(())
        }
        ("add", [url]) => print_json(&service.add_credential_from_url(url, None).await?),
        ("add", [url, name]) => print_json(&service.add_credential_from_url(url, Some(name.as_str())).await?),
        ("add", [name, engine, host, port, username, database]) => {
            let password = env::var(PASSWORD_ENV).with_context(|| format!("{PASSWORD_ENV} must hold the password"))?;
            let fields = NewCredential {
                name: name.clone(),
                engine: engine.clone(),
                host: host.clone(),
                port: port.clone(),
                username: username.clone(),
                password,
                database_name: database.clone(),
            };
            print_json(&service.add_credential(&fields).await?)
        }
        ("list", []) => print_json(&service.list_credentials().await?),
        ("backup", [database]) => print_json(&service.backup_database(database).await?),
        ("backup-all", []) => backup_all(service).await,
        ("catalog", []) => print_json(&service.list_catalog().await?),
        ("log", []) => print_json(&service.catalog().entries().await?),
        ("artifacts", [database]) => print_json(&service.catalog().artifact_stamps(database).await?),
        ("download", [database, timestamp, dest]) => {
            download(service, database, timestamp, Path::new(dest)).await
        }
        ("restore", [database, timestamp]) => print_json(&service.restore(database, timestamp).await?),
        _ => bail!("{USAGE}"),
    }
}

/// On-demand backup of every credential, run in the background with the usual concurrency bound.
async fn backup_all(service: &BackupService) -> Result<()> {
    let handles: Vec<_> = service
        .list_credentials()
        .await?
        .into_iter()
        .map(|credential| (credential.database_name.clone(), service.spawn_backup(credential)))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    let mut failed = 0;
    for (database, handle) in handles {
        let result = match handle.await? {
            Ok(outcome) => serde_json::json!({ "database_name": database, "outcome": outcome }),
            Err(e) => {
                failed += 1;
                serde_json::json!({ "database_name": database, "error": e.to_string() })
            }
        };
        results.push(result);
    }
    print_json(&results)?;
    if failed > 0 {
        bail!("{failed} of {} backups failed", results.len());
    }
    Ok(())
}

async fn download(service: &BackupService, database: &str, timestamp: &str, dest: &Path) -> Result<()> {
    let mut artifact = service.download_artifact(database, timestamp).await?;
    let mut out = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    tokio::io::copy(&mut artifact.file, &mut out)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    out.sync_all().await?;

    print_json(&serde_json::json!({
        "artifact_name": artifact.artifact_name,
        "size_bytes": artifact.size_bytes,
        "dest": dest.display().to_string(),
    }))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
