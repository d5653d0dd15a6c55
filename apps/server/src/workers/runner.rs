//! Polling loop that drives the schedule runner

use super::schedule_runner::ScheduleRunner;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::{
    sync::watch,
    time::{sleep, Duration},
};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ScheduleLoopConfig {
    /// Time between polls. Shorter than an hour so every run hour is seen.
    pub interval: Duration,
    pub jitter_ratio: f64,
}

impl ScheduleLoopConfig {
    pub fn from_config(config: &crate::config::SchedulesConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_seconds),
            jitter_ratio: config.poll_jitter_ratio,
        }
    }
}

impl Default for ScheduleLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            jitter_ratio: 0.1,
        }
    }
}

fn jittered_duration(base: Duration, jitter_ratio: f64) -> Duration {
    if base.is_zero() || jitter_ratio <= 0.0 {
        return base;
    }

    // Deterministic-enough jitter source without adding a new RNG dependency.
    let bytes = *Uuid::new_v4().as_bytes();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    let unit = (u64::from_le_bytes(head) as f64) / (u64::MAX as f64); // [0,1]
    let signed = unit * 2.0 - 1.0; // [-1,1]
    let factor = (1.0 + signed * jitter_ratio).max(0.0);
    base.mul_f64(factor)
}

/// Poll `runner` until `shutdown` flips to true or its sender is dropped.
pub async fn run_schedule_loop(
    runner: Arc<ScheduleRunner>,
    config: ScheduleLoopConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!(interval = ?config.interval, "Schedule runner starting");

    loop {
        if *shutdown.borrow() {
            tracing::info!("Schedule runner shutdown requested, stopping...");
            return Ok(());
        }

        match runner.run_due(Utc::now()).await {
            Ok(summary) if summary.due > 0 => tracing::info!(
                due = summary.due,
                succeeded = summary.succeeded,
                failed = summary.failed,
                disabled = summary.disabled,
                skipped = summary.skipped,
                "Schedule poll finished"
            ),
            Ok(_) => tracing::debug!("No schedules due"),
            Err(e) => tracing::error!(error = %e, "Schedule poll failed"),
        }

        let sleep_for = jittered_duration(config.interval, config.jitter_ratio);
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    tracing::info!("Schedule runner shutdown channel closed, stopping...");
                    return Ok(());
                }
            }
            _ = sleep(sleep_for) => {}
        }
    }
}
