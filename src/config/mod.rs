// dbkeeper/src/config/mod.rs
use anyhow::{Context, Result};
use cron::Schedule;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://dbkeeper.db";
pub const DEFAULT_ARTIFACT_DIR: &str = "./dumps";
/// Once a day at 03:00 UTC.
pub const DEFAULT_BACKUP_SCHEDULE: &str = "0 0 3 * * *";
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 512 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_BACKUPS: usize = 2;
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Struct for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    pub artifact_dir: Option<PathBuf>,
    pub backup_schedule: Option<String>,
    pub max_output_bytes: Option<usize>,
    pub max_concurrent_backups: Option<usize>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite URL holding the credentials and backup_logs tables.
    pub database_url: String,
    pub artifact_dir: PathBuf,
    /// Normalized (6-field) cron expression.
    pub backup_schedule: String,
    pub max_output_bytes: usize,
    pub max_concurrent_backups: usize,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            backup_schedule: DEFAULT_BACKUP_SCHEDULE.to_string(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrent_backups: DEFAULT_MAX_CONCURRENT_BACKUPS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `config_path` if it exists, then applies `DBKEEPER_*` environment overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        let raw = if config_path.exists() {
            let config_content = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file at {}", config_path.display())
            })?;
            serde_json::from_str::<RawJsonConfig>(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig::default()
        };

        let raw = apply_env_overrides(raw, |key| env::var(key).ok())?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let defaults = AppConfig::default();

        let database_url = raw.database_url.unwrap_or(defaults.database_url);
        if database_url.trim().is_empty() {
            anyhow::bail!("database_url cannot be empty.");
        }

        let artifact_dir = raw.artifact_dir.unwrap_or(defaults.artifact_dir);
        if artifact_dir.to_string_lossy().trim().is_empty() {
            anyhow::bail!("artifact_dir cannot be empty.");
        }

        let backup_schedule = normalize_schedule(
            raw.backup_schedule.as_deref().unwrap_or(DEFAULT_BACKUP_SCHEDULE),
        )?;

        let max_output_bytes = raw.max_output_bytes.unwrap_or(defaults.max_output_bytes);
        if max_output_bytes == 0 {
            anyhow::bail!("max_output_bytes must be greater than zero.");
        }

        let max_concurrent_backups = raw
            .max_concurrent_backups
            .unwrap_or(defaults.max_concurrent_backups);
        if max_concurrent_backups == 0 {
            anyhow::bail!("max_concurrent_backups must be greater than zero.");
        }

        Ok(AppConfig {
            database_url,
            artifact_dir,
            backup_schedule,
            max_output_bytes,
            max_concurrent_backups,
            log_level: raw.log_level.unwrap_or(defaults.log_level),
        })
    }

    pub fn schedule(&self) -> Result<Schedule> {
        parse_schedule(&self.backup_schedule)
    }
}

fn apply_env_overrides<F>(mut raw: RawJsonConfig, lookup: F) -> Result<RawJsonConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("DBKEEPER_DATABASE_URL") {
        raw.database_url = Some(v);
    }
    if let Some(v) = lookup("DBKEEPER_ARTIFACT_DIR") {
        raw.artifact_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("DBKEEPER_BACKUP_SCHEDULE") {
        raw.backup_schedule = Some(v);
    }
    if let Some(v) = lookup("DBKEEPER_MAX_OUTPUT_BYTES") {
        raw.max_output_bytes = Some(
            v.trim()
                .parse()
                .with_context(|| format!("DBKEEPER_MAX_OUTPUT_BYTES is not a number: {}", v))?,
        );
    }
    if let Some(v) = lookup("DBKEEPER_MAX_CONCURRENT_BACKUPS") {
        raw.max_concurrent_backups = Some(v.trim().parse().with_context(|| {
            format!("DBKEEPER_MAX_CONCURRENT_BACKUPS is not a number: {}", v)
        })?);
    }
    if let Some(v) = lookup("DBKEEPER_LOG_LEVEL") {
        raw.log_level = Some(v);
    }
    Ok(raw)
}

/// Accepts classic 5-field crontab lines by prepending a seconds field.
fn normalize_schedule(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        _ => anyhow::bail!(
            "backup_schedule must have 5, 6 or 7 fields, got '{}'",
            expression
        ),
    };
    parse_schedule(&normalized)?;
    Ok(normalized)
}

fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| anyhow::anyhow!("Invalid backup_schedule '{}': {}", expression, e))
}
