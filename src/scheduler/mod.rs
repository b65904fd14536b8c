//! Recurring backup trigger.
//!
//! One background task sleeps until the next cron fire time, backs up every stored
//! credential, and repeats until shut down. Ticks missed while the process was down
//! are not replayed.

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::service::BackupService;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct BackupScheduler {
    service: BackupService,
    schedule: Schedule,
}

/// Disarms a running scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the scheduler. A tick already in progress finishes first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }
}

impl BackupScheduler {
    pub fn new(service: BackupService, schedule: Schedule) -> Self {
        Self { service, schedule }
    }

    /// Arms the schedule on a background task.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        SchedulerHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        info!("backup scheduler armed");
        let mut last = Utc::now();
        loop {
            let Some(next) = self.next_fire(last) else {
                warn!("schedule has no upcoming fire times; scheduler stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, wait_secs = wait.as_secs(), "waiting for next tick");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let summary = self.run_tick().await;
            info!(
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "scheduled backup tick finished"
            );
            last = resume_point(next, Utc::now());
        }
        info!("backup scheduler disarmed");
    }

    /// First fire time strictly after `last`.
    fn next_fire(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&last).next()
    }

    /// Backs up every stored credential. One credential failing never stops the others.
    pub async fn run_tick(&self) -> TickSummary {
        let credentials = match self.service.list_credentials().await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(error = %e, "could not list credentials; skipping tick");
                return TickSummary::default();
            }
        };

        let mut summary = TickSummary {
            attempted: credentials.len(),
            ..TickSummary::default()
        };

        let mut tasks = JoinSet::new();
        for credential in credentials {
            let service = self.service.clone();
            tasks.spawn(async move {
                let result = service.backup_one(&credential).await;
                (credential, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => summary.succeeded += 1,
                Ok((credential, Err(e))) => {
                    summary.failed += 1;
                    warn!(
                        credential_id = credential.id,
                        database = %credential.database_name,
                        error = %e,
                        "scheduled backup failed"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "scheduled backup task panicked");
                }
            }
        }

        summary
    }
}

/// Where to look for the next fire time after firing at `fired`.
///
/// Never earlier than `fired`, so a wall clock lagging the sleep deadline cannot
/// yield the same fire time twice. Fire times that passed during a long tick are skipped.
fn resume_point(fired: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    fired.max(now)
}
