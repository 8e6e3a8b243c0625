//! Cron wiring for the live, snapshot and holiday-refresh jobs.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use mkpi_core::local_date;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::holiday::CachedHolidayCalendar;
use crate::orchestrator::Orchestrator;

/// `None` when the scheduler is disabled in config. The returned scheduler is not started.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    orchestrator: Arc<Orchestrator>,
    holidays: Arc<CachedHolidayCalendar>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(config, orchestrator, holidays).await.map(Some)
}

pub async fn build_scheduler(
    config: &SyncConfig,
    orchestrator: Arc<Orchestrator>,
    holidays: Arc<CachedHolidayCalendar>,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let offset = config.utc_offset;

    let orch = orchestrator.clone();
    let sync_job = Job::new_async_tz(config.sync_cron.as_str(), offset, move |_id, _lock| {
        let orch = orch.clone();
        Box::pin(async move {
            // Failures are logged and notified inside the tick.
            let _ = orch.run_sync_tick(Utc::now()).await;
        })
    })
    .with_context(|| format!("creating sync job for cron {}", config.sync_cron))?;
    sched.add(sync_job).await.context("adding sync job")?;

    let orch = orchestrator;
    let snapshot_job = Job::new_async_tz(config.snapshot_cron.as_str(), offset, move |_id, _lock| {
        let orch = orch.clone();
        Box::pin(async move {
            let now = Utc::now();
            let date = local_date(now, offset);
            if orch.calendar().is_holiday(date).await {
                info!(%date, "holiday; snapshot job skipped");
                return;
            }
            let _ = orch.run_snapshot_tick(now).await;
        })
    })
    .with_context(|| format!("creating snapshot job for cron {}", config.snapshot_cron))?;
    sched.add(snapshot_job).await.context("adding snapshot job")?;

    let holiday_job = Job::new_async_tz(config.holiday_cron.as_str(), offset, move |_id, _lock| {
        let holidays = holidays.clone();
        Box::pin(async move {
            if let Err(err) = holidays.refresh().await {
                warn!(error = %err, "holiday refresh failed; keeping previous calendar");
            }
        })
    })
    .with_context(|| format!("creating holiday job for cron {}", config.holiday_cron))?;
    sched.add(holiday_job).await.context("adding holiday job")?;

    Ok(sched)
}
