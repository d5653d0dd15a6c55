//! Scheduled search execution and delivery
//!
//! Each poll considers every enabled schedule. A schedule fires when its owner's
//! local time falls in an eligible window it has not fired in yet. Firing takes
//! the schedule's lock, claims the window, exports and delivers. Failures count
//! towards auto-disable; the owner is notified once when that happens.

use super::notifier::OwnerNotifier;
use crate::db::{ScheduleLocks, ScheduleStore, UserDirectory};
use crate::delivery::{Delivery, DeliverySink};
use crate::models::{RunWindow, Schedule, SearchDefinition, User};
use crate::services::ReportExporter;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct ScheduleRunnerConfig {
    /// Consecutive failures after which a schedule is disabled.
    pub failure_threshold: i32,
    pub max_concurrent: usize,
    /// Fire later in the day when the run hour was missed.
    pub catch_up: bool,
    pub query_timeout: Duration,
}

impl Default for ScheduleRunnerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            max_concurrent: 2,
            catch_up: true,
            query_timeout: Duration::from_secs(300),
        }
    }
}

/// Counts from one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub disabled: usize,
    /// Held by another runner or already fired in this window.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed { disabled: bool },
    Skipped,
}

pub struct ScheduleRunner {
    schedules: Arc<dyn ScheduleStore>,
    users: Arc<dyn UserDirectory>,
    locks: Arc<dyn ScheduleLocks>,
    exporter: Arc<ReportExporter>,
    sink: Arc<dyn DeliverySink>,
    notifier: Arc<dyn OwnerNotifier>,
    permits: Arc<Semaphore>,
    config: ScheduleRunnerConfig,
}

impl ScheduleRunner {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        users: Arc<dyn UserDirectory>,
        locks: Arc<dyn ScheduleLocks>,
        exporter: Arc<ReportExporter>,
        sink: Arc<dyn DeliverySink>,
        notifier: Arc<dyn OwnerNotifier>,
        config: ScheduleRunnerConfig,
    ) -> Self {
        Self {
            schedules,
            users,
            locks,
            exporter,
            sink,
            notifier,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
        }
    }

    /// Fire every schedule due at `now`.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let definitions = self.schedules.scheduled_definitions().await?;

        let mut jobs = Vec::new();
        for definition in &definitions {
            let Some(owner) = self.users.get(definition.user_id).await? else {
                tracing::warn!(
                    search_definition_id = definition.id,
                    user_id = definition.user_id,
                    "Skipping schedules of a definition whose owner no longer exists"
                );
                continue;
            };
            let owner = Arc::new(owner);
            let tz = owner.tz();
            for schedule in &definition.schedules {
                if let Some(window) = schedule.due_window(tz, now, self.config.catch_up) {
                    jobs.push(self.fire(definition, schedule, owner.clone(), window, now));
                }
            }
        }

        let mut summary = RunSummary {
            due: jobs.len(),
            ..Default::default()
        };
        for outcome in futures::future::join_all(jobs).await {
            match outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Failed { disabled } => {
                    summary.failed += 1;
                    if disabled {
                        summary.disabled += 1;
                    }
                }
                Outcome::Skipped => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    async fn fire(
        &self,
        definition: &SearchDefinition,
        schedule: &Schedule,
        owner: Arc<User>,
        window: RunWindow,
        now: DateTime<Utc>,
    ) -> Outcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return Outcome::Skipped;
        };

        let guard = match self.locks.try_acquire(schedule.id).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!(schedule_id = schedule.id, "Schedule held by another runner");
                return Outcome::Skipped;
            }
            Err(e) => {
                tracing::error!(schedule_id = schedule.id, error = %e, "Failed to lock schedule");
                return Outcome::Skipped;
            }
        };

        let outcome = self.fire_locked(definition, schedule, &owner, window, now).await;

        if let Err(e) = guard.release().await {
            tracing::warn!(schedule_id = schedule.id, error = %e, "Failed to release schedule lock");
        }
        outcome
    }

    async fn fire_locked(
        &self,
        definition: &SearchDefinition,
        schedule: &Schedule,
        owner: &User,
        window: RunWindow,
        now: DateTime<Utc>,
    ) -> Outcome {
        // Another runner may have fired between listing and locking.
        match self.schedules.claim_window(schedule.id, window).await {
            Ok(true) => {}
            Ok(false) => return Outcome::Skipped,
            Err(e) => {
                tracing::error!(schedule_id = schedule.id, error = %e, "Failed to claim schedule window");
                return Outcome::Skipped;
            }
        }

        let start = Instant::now();
        tracing::info!(
            schedule_id = schedule.id,
            search_definition_id = definition.id,
            window = %window,
            mode = schedule.destination.mode(),
            "Running scheduled search"
        );

        match self.execute(definition, schedule, owner, now).await {
            Ok(rows) => {
                if let Err(e) = self.schedules.record_success(schedule.id, now).await {
                    tracing::error!(schedule_id = schedule.id, error = %e, "Failed to record schedule success");
                }
                crate::metrics::SCHEDULE_RUNS_TOTAL
                    .with_label_values(&["succeeded"])
                    .inc();
                tracing::info!(
                    schedule_id = schedule.id,
                    rows,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Scheduled search delivered"
                );
                Outcome::Succeeded
            }
            Err(e) => {
                crate::metrics::SCHEDULE_RUNS_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                let disabled = self.record_failure(definition, schedule, owner, &e).await;
                Outcome::Failed { disabled }
            }
        }
    }

    async fn execute(
        &self,
        definition: &SearchDefinition,
        schedule: &Schedule,
        owner: &User,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let export = tokio::time::timeout(
            self.config.query_timeout,
            self.exporter.export_csv(definition, owner, now),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "scheduled export exceeded {:?}",
                self.config.query_timeout
            ))
        })??;

        let rows = export.row_count;
        let delivery = Delivery {
            bytes: export.bytes,
            filename: export.filename,
            content_type: export.content_type.to_string(),
        };
        self.sink.deliver(&delivery, &schedule.destination).await?;
        Ok(rows)
    }

    /// Returns true when this failure disabled the schedule.
    async fn record_failure(
        &self,
        definition: &SearchDefinition,
        schedule: &Schedule,
        owner: &User,
        error: &Error,
    ) -> bool {
        let reason = error.to_string();
        tracing::warn!(
            schedule_id = schedule.id,
            search_definition_id = definition.id,
            error = %reason,
            "Scheduled search failed"
        );

        let outcome = match self
            .schedules
            .record_failure(schedule.id, &reason, self.config.failure_threshold)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(schedule_id = schedule.id, error = %e, "Failed to record schedule failure");
                return false;
            }
        };
        if !outcome.disabled_now {
            return false;
        }

        crate::metrics::SCHEDULES_DISABLED_TOTAL.inc();
        tracing::warn!(
            schedule_id = schedule.id,
            consecutive_failures = outcome.consecutive_failures,
            "Schedule disabled after repeated failures"
        );

        let mut disabled = schedule.clone();
        disabled.consecutive_failure_count = outcome.consecutive_failures;
        disabled.disabled = true;
        disabled.disabled_reason = Some(reason.clone());
        if let Err(e) = self
            .notifier
            .schedule_disabled(owner, definition, &disabled, &reason)
            .await
        {
            tracing::error!(
                schedule_id = schedule.id,
                user_id = owner.id,
                error = %e,
                "Failed to notify owner of disabled schedule"
            );
        }
        true
    }
}
