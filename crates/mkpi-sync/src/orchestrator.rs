//! Tick entry points: gates, connector pulls, mirroring, per-category and
//! aggregate report builds, cache invalidation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use mkpi_connectors::{decode_rows, ConnectorError, SourceConnector};
use mkpi_core::{
    Category, CategoryId, EntityType, MirroredRecord, ProcessReport, PullMode, SourceSystem,
    TickContext, TickKind, TimeWindow,
};
use mkpi_metrics::{derive_performance, main_partials, process_partials, reconcile_lots, RowSet};
use mkpi_storage::{
    CaptureFilter, DateRange, MirrorQuery, ReportCaches, Repositories, StorageError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::builder::ReportBuilder;
use crate::holiday::{HolidayCalendar, HolidaySet};
use crate::notify::{LogNotifier, Notifier, PipelineAlert};

/// Entity whose newest live capture decides whether the current hour already ran.
pub const IDEMPOTENCY_REFERENCE: EntityType = EntityType::LotStatus;

#[derive(Debug)]
pub struct SourceFailure {
    pub source_system: SourceSystem,
    pub entity: EntityType,
    pub error: ConnectorError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.source_system, self.entity, self.error)
    }
}

fn describe_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {}", describe_failures(.0))]
    SourceUnavailable(Vec<SourceFailure>),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub run_id: Uuid,
    pub kind: TickKind,
    pub captured_at: DateTime<Utc>,
    pub mirrored: usize,
    pub performance_records: usize,
    pub process_reports: Vec<Uuid>,
    pub main_report: Uuid,
    pub overlaps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TickOutcome {
    SkippedHoliday,
    SkippedSameHour,
    SkippedSnapshotExists,
    Completed(TickSummary),
}

pub struct Orchestrator {
    repos: Repositories,
    connectors: Vec<Arc<dyn SourceConnector>>,
    categories: Vec<Category>,
    utc_offset: FixedOffset,
    calendar: Arc<dyn HolidayCalendar>,
    notifier: Arc<dyn Notifier>,
    caches: Arc<ReportCaches>,
    builder: ReportBuilder,
}

impl Orchestrator {
    pub fn new(
        repos: Repositories,
        connectors: Vec<Arc<dyn SourceConnector>>,
        categories: Vec<Category>,
        utc_offset: FixedOffset,
    ) -> Self {
        let caches = Arc::new(ReportCaches::new());
        let builder = ReportBuilder::new(repos.reports.clone(), caches.clone());
        Self {
            repos,
            connectors,
            categories,
            utc_offset,
            calendar: Arc::new(HolidaySet::default()),
            notifier: Arc::new(LogNotifier),
            caches,
            builder,
        }
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn HolidayCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Shares the caches the report reader serves from.
    pub fn with_caches(mut self, caches: Arc<ReportCaches>) -> Self {
        self.builder = ReportBuilder::new(self.repos.reports.clone(), caches.clone());
        self.caches = caches;
        self
    }

    pub fn caches(&self) -> Arc<ReportCaches> {
        self.caches.clone()
    }

    pub fn calendar(&self) -> Arc<dyn HolidayCalendar> {
        self.calendar.clone()
    }

    /// Hourly live tick.
    pub async fn run_sync_tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, PipelineError> {
        let ctx = TickContext::new(TickKind::Live, now, self.utc_offset);
        let span = info_span!("sync_tick", run_id = %ctx.run_id, captured_at = %ctx.captured_at);
        async {
            if self.calendar.is_holiday(ctx.business_date).await {
                info!(date = %ctx.business_date, "holiday; skipping tick");
                return Ok(TickOutcome::SkippedHoliday);
            }

            let result = self.gated_sync(&ctx).await;
            if let Err(err) = &result {
                error!(error = %err, "sync tick failed");
                self.alert(&ctx, err).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn gated_sync(&self, ctx: &TickContext) -> Result<TickOutcome, PipelineError> {
        let newest = self
            .repos
            .mirror
            .latest(IDEMPOTENCY_REFERENCE, Some(false))
            .await?;
        if let Some(record) = newest.filter(|r| ctx.same_hour_slot(r.captured_at)) {
            info!(last_capture = %record.captured_at, "hour slot already synced; skipping tick");
            return Ok(TickOutcome::SkippedSameHour);
        }
        self.run_pipeline(ctx).await.map(TickOutcome::Completed)
    }

    /// End-of-day snapshot tick. Failures are logged and returned, never notified.
    pub async fn run_snapshot_tick(
        &self,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, PipelineError> {
        let ctx = TickContext::new(TickKind::Snapshot, now, self.utc_offset);
        let span = info_span!("snapshot_tick", run_id = %ctx.run_id, captured_at = %ctx.captured_at);
        async {
            let result = self.gated_snapshot(&ctx).await;
            if let Err(err) = &result {
                error!(error = %err, "snapshot tick failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn gated_snapshot(&self, ctx: &TickContext) -> Result<TickOutcome, PipelineError> {
        let existing = self
            .repos
            .reports
            .main_in_range(DateRange::day(ctx.business_date), true)
            .await?;
        if !existing.is_empty() {
            info!(date = %ctx.business_date, "snapshot already taken; skipping tick");
            return Ok(TickOutcome::SkippedSnapshotExists);
        }
        self.run_pipeline(ctx).await.map(TickOutcome::Completed)
    }

    async fn alert(&self, ctx: &TickContext, err: &PipelineError) {
        let alert = PipelineAlert {
            run_id: ctx.run_id,
            kind: ctx.kind,
            captured_at: ctx.captured_at,
            message: err.to_string(),
        };
        if let Err(notify_err) = self.notifier.notify(&alert).await {
            warn!(error = %notify_err, "notifier failed");
        }
    }

    async fn run_pipeline(&self, ctx: &TickContext) -> Result<TickSummary, PipelineError> {
        let windows = self.pull_windows(ctx).await?;
        let mut mirrored = 0usize;
        let mut failures = Vec::new();
        for connector in &self.connectors {
            match self.pull_source(ctx, &windows, connector.as_ref()).await {
                Ok(records) => {
                    mirrored += self.repos.mirror.insert_batch(&records).await?;
                }
                Err(failure) => {
                    warn!(
                        source = %failure.source_system,
                        entity = %failure.entity,
                        error = %failure.error,
                        "source pull failed"
                    );
                    failures.push(failure);
                }
            }
        }
        if !failures.is_empty() {
            return Err(PipelineError::SourceUnavailable(failures));
        }

        let rows = self.load_rows(ctx).await?;
        let costs = rows.cost_index();
        let mut performance_records = 0usize;
        let mut overlaps = 0usize;
        let mut reports: Vec<ProcessReport> = Vec::with_capacity(self.categories.len());

        for category in &self.categories {
            let cat_ctx = ctx.for_category(category);
            let cat_rows = rows.for_category(&category.id);

            let tracked = self.repos.lots.tracked(&category.id).await?;
            let lots = reconcile_lots(ctx, &tracked, &cat_rows.lot_statuses);
            let records = derive_performance(&cat_ctx, &cat_rows, &costs, &lots.completions);
            performance_records += self.repos.performance.insert_batch(&records).await?;
            self.repos.lots.upsert(&lots.upserts).await?;
            self.repos.lots.remove(&lots.removals).await?;

            let built = self
                .builder
                .build_process(&cat_ctx, process_partials(&cat_rows, &records))
                .await?;
            overlaps += built.overlaps.len();
            reports.push(built.report);
        }

        let attendance: Vec<_> = rows
            .attendance
            .iter()
            .filter(|row| self.is_configured(&row.category))
            .cloned()
            .collect();
        let main = self
            .builder
            .build_main(ctx, main_partials(&attendance, &reports))
            .await?;
        overlaps += main.overlaps.len();

        self.caches.invalidate_main().await;

        let summary = TickSummary {
            run_id: ctx.run_id,
            kind: ctx.kind,
            captured_at: ctx.captured_at,
            mirrored,
            performance_records,
            process_reports: reports.iter().map(|r| r.id).collect(),
            main_report: main.report.id,
            overlaps,
        };
        info!(
            mirrored,
            performance_records,
            categories = reports.len(),
            overlaps,
            "tick complete"
        );
        Ok(summary)
    }

    fn is_configured(&self, category: &CategoryId) -> bool {
        self.categories.iter().any(|c| &c.id == category)
    }

    /// Pulls every entity of one source; a single failing entity fails the source.
    async fn pull_source(
        &self,
        ctx: &TickContext,
        windows: &HashMap<EntityType, TimeWindow>,
        connector: &dyn SourceConnector,
    ) -> Result<Vec<MirroredRecord>, SourceFailure> {
        let source = connector.source();
        let mut records = Vec::new();
        for &entity in source.entity_types() {
            let raw = match windows.get(&entity) {
                Some(window) => connector.pull(ctx.run_id, entity, *window).await,
                None => connector.pull_current(ctx.run_id, entity).await,
            }
            .map_err(|error| SourceFailure {
                source_system: source,
                entity,
                error,
            })?;

            records.extend(
                decode_rows(entity, &raw)
                    .into_iter()
                    .map(|payload| MirroredRecord::new(ctx.captured_at, ctx.snapshot(), payload)),
            );
        }
        Ok(records)
    }

    /// Incremental windows of a live tick, computed before anything is mirrored.
    async fn pull_windows(
        &self,
        ctx: &TickContext,
    ) -> Result<HashMap<EntityType, TimeWindow>, StorageError> {
        let mut windows = HashMap::new();
        if ctx.snapshot() {
            return Ok(windows);
        }
        for entity in EntityType::ALL {
            if entity.pull_mode() == PullMode::Windowed {
                windows.insert(entity, self.pull_window(ctx, entity).await?);
            }
        }
        Ok(windows)
    }

    /// From the entity's newest live capture of the business day (else local midnight) to now.
    async fn pull_window(
        &self,
        ctx: &TickContext,
        entity: EntityType,
    ) -> Result<TimeWindow, StorageError> {
        let newest = self.repos.mirror.latest(entity, Some(false)).await?;
        let start = newest
            .map(|r| r.captured_at)
            .filter(|ts| *ts >= ctx.day_start && *ts < ctx.captured_at)
            .unwrap_or(ctx.day_start);
        Ok(TimeWindow::new(start, ctx.captured_at))
    }

    /// Mirrored rows the tick's metrics are computed from.
    async fn load_rows(&self, ctx: &TickContext) -> Result<RowSet, StorageError> {
        let mut rows = RowSet::default();
        for entity in EntityType::ALL {
            let captured = match (ctx.kind, entity.pull_mode()) {
                (TickKind::Live, PullMode::Windowed) => CaptureFilter::Window(ctx.day_window()),
                _ => CaptureFilter::At(ctx.captured_at),
            };
            let query = MirrorQuery {
                entity,
                captured,
                snapshot: ctx.snapshot(),
            };
            for record in self.repos.mirror.query(&query).await? {
                rows.push(record.payload);
            }
        }
        Ok(rows)
    }
}
