//! Sync pipeline: tick orchestration, report building and reads, scheduling.

pub mod builder;
pub mod config;
pub mod holiday;
pub mod notify;
pub mod orchestrator;
pub mod reader;
pub mod schedule;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use mkpi_connectors::SourceRegistry;
use mkpi_storage::{HttpFetcher, MemoryStore, PgStore, ReportCaches, Repositories};
use tracing::{info, warn};

pub use builder::{Built, ReportBuilder};
pub use config::{utc_offset_from_hours, StoreKind, SyncConfig};
pub use holiday::{
    CachedHolidayCalendar, HolidayCalendar, HolidaySet, HolidaySource, YamlHolidaySource,
};
pub use notify::{LogNotifier, Notifier, PipelineAlert};
pub use orchestrator::{
    Orchestrator, PipelineError, SourceFailure, TickOutcome, TickSummary, IDEMPOTENCY_REFERENCE,
};
pub use reader::ReportReader;
pub use schedule::{build_scheduler, maybe_build_scheduler};

pub const CRATE_NAME: &str = "mkpi-sync";

/// Everything a process needs to run ticks and serve reads.
pub struct Runtime {
    pub config: SyncConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub reader: ReportReader,
    pub holidays: Arc<CachedHolidayCalendar>,
}

pub async fn open_repositories(config: &SyncConfig) -> Result<Repositories> {
    match config.store {
        StoreKind::Postgres => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to postgres")?;
            Ok(Repositories::from_store(Arc::new(store)))
        }
        StoreKind::Memory => Ok(Repositories::from_store(Arc::new(MemoryStore::new()))),
    }
}

pub async fn build_runtime(config: SyncConfig) -> Result<Runtime> {
    let registry = SourceRegistry::load(&config.workspace_root)?;
    let http = HttpFetcher::new(config.http_client_config()).context("building http client")?;
    let connectors = registry.connectors(&config.workspace_root, &http)?;

    let holidays = Arc::new(CachedHolidayCalendar::new(Arc::new(YamlHolidaySource::new(
        config.holidays_path(),
    ))));
    if let Err(err) = holidays.refresh().await {
        warn!(error = %err, "no holiday calendar loaded; every day is a working day");
    }

    let repos = open_repositories(&config).await?;
    let caches = Arc::new(ReportCaches::new());
    let reader = ReportReader::new(repos.reports.clone(), caches.clone());
    let orchestrator = Orchestrator::new(repos, connectors, registry.categories, config.utc_offset)
        .with_calendar(holidays.clone())
        .with_caches(caches);

    info!(
        sources = registry.sources.len(),
        store = ?config.store,
        "runtime ready"
    );
    Ok(Runtime {
        config,
        orchestrator: Arc::new(orchestrator),
        reader,
        holidays,
    })
}

pub async fn run_sync_once_from_env() -> Result<TickOutcome> {
    let runtime = build_runtime(SyncConfig::from_env()).await?;
    Ok(runtime.orchestrator.run_sync_tick(Utc::now()).await?)
}

pub async fn run_snapshot_once_from_env() -> Result<TickOutcome> {
    let runtime = build_runtime(SyncConfig::from_env()).await?;
    Ok(runtime.orchestrator.run_snapshot_tick(Utc::now()).await?)
}
