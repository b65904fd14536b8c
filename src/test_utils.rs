//! Shared fixtures for unit tests: an in-memory store, a temp artifact directory and
//! a scripted `CommandRunner`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use crate::catalog::BackupCatalog;
use crate::credentials::{Credential, CredentialStore, NewCredential};
use crate::errors::{AppError, Result};
use crate::executor::{CommandRunner, CommandSpec, ExecOptions, ExecOutput};
use crate::storage::Storage;

enum Fallback {
    Stdout(Vec<u8>),
    Fail { code: i32, stderr: String },
}

/// Replays scripted outcomes in order, then the fallback; records every call.
pub struct StubRunner {
    script: Mutex<VecDeque<Result<Vec<u8>>>>,
    fallback: Option<Fallback>,
    delay: Option<Duration>,
    fail_database: Option<String>,
    calls: Mutex<Vec<(CommandSpec, ExecOptions)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubRunner {
    pub fn new(script: Vec<Result<Vec<u8>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            delay: None,
            fail_database: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call succeeds with `stdout`.
    pub fn with_stdout(stdout: &[u8]) -> Self {
        let mut runner = Self::new(Vec::new());
        runner.fallback = Some(Fallback::Stdout(stdout.to_vec()));
        runner
    }

    /// Every call exits with `code`.
    pub fn failing(code: i32, stderr: &str) -> Self {
        let mut runner = Self::new(Vec::new());
        runner.fallback = Some(Fallback::Fail {
            code,
            stderr: stderr.to_string(),
        });
        runner
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls naming `database_name` among their args exit 1 regardless of the script.
    pub fn failing_for(mut self, database_name: &str) -> Self {
        self.fail_database = Some(database_name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(CommandSpec, ExecOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, program: &str) -> Result<Vec<u8>> {
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        match &self.fallback {
            Some(Fallback::Stdout(bytes)) => Ok(bytes.clone()),
            Some(Fallback::Fail { code, stderr }) => Err(AppError::Process {
                program: program.to_string(),
                code: Some(*code),
                stderr: stderr.clone(),
            }),
            None => Err(AppError::Validation("stub runner script exhausted".into())),
        }
    }
}

#[async_trait]
impl CommandRunner for StubRunner {
    async fn run(&self, spec: &CommandSpec, opts: ExecOptions) -> Result<ExecOutput> {
        self.calls.lock().unwrap().push((spec.clone(), opts));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let targeted = self
            .fail_database
            .as_ref()
            .is_some_and(|db| spec.args.iter().any(|a| a == db));
        let reply = if targeted {
            Err(AppError::Process {
                program: spec.program.clone(),
                code: Some(1),
                stderr: "connection refused".into(),
            })
        } else {
            self.next_reply(&spec.program)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let stdout = reply?;
        Ok(ExecOutput {
            exit_code: Some(0),
            stdout: if opts.capture_stdout { stdout } else { Vec::new() },
        })
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub storage: Storage,
    pub credentials: CredentialStore,
    pub catalog: BackupCatalog,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let storage = Storage::in_memory().await.unwrap();
        let credentials = CredentialStore::new(&storage);
        let catalog = BackupCatalog::new(&storage, dir.path().join("dumps"));
        Self {
            dir,
            storage,
            credentials,
            catalog,
        }
    }

    pub async fn add(&self, fields: NewCredential) -> Credential {
        let id = self.credentials.add(&fields).await.unwrap();
        self.credentials
            .list()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.id == id)
            .unwrap()
    }
}

/// `orders` / postgres / db1:5432 / a:x / orders_db
pub fn orders_credential() -> NewCredential {
    NewCredential {
        name: "orders".into(),
        engine: "postgres".into(),
        host: "db1".into(),
        port: "5432".into(),
        username: "a".into(),
        password: "x".into(),
        database_name: "orders_db".into(),
    }
}

pub fn credential_for(name: &str, engine: &str, database_name: &str) -> NewCredential {
    NewCredential {
        name: name.into(),
        engine: engine.into(),
        database_name: database_name.into(),
        ..orders_credential()
    }
}
