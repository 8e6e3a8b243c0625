//! Assembles partial metric sets into one persisted report.

use std::sync::Arc;

use mkpi_core::{
    merge_first_non_null, CategoryContext, FieldOverlap, MainMetrics, MainReport, ProcessMetrics,
    ProcessReport, TickContext,
};
use mkpi_storage::{MainCacheKey, ProcessCacheKey, ReportCaches, ReportRepository, StorageError};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Built<R> {
    pub report: R,
    pub overlaps: Vec<FieldOverlap>,
}

pub struct ReportBuilder {
    reports: Arc<dyn ReportRepository>,
    caches: Arc<ReportCaches>,
}

impl ReportBuilder {
    pub fn new(reports: Arc<dyn ReportRepository>, caches: Arc<ReportCaches>) -> Self {
        Self { reports, caches }
    }

    pub async fn build_process(
        &self,
        ctx: &CategoryContext<'_>,
        partials: Vec<ProcessMetrics>,
    ) -> Result<Built<ProcessReport>, StorageError> {
        let merged = merge_first_non_null(partials);
        let category = &ctx.category.id;
        log_overlaps(category.as_str(), &merged.overlaps);
        if merged.blank_partials > 0 {
            debug!(%category, blank = merged.blank_partials, "skipped empty partials");
        }

        let report = ProcessReport {
            id: Uuid::new_v4(),
            category: category.clone(),
            business_date: ctx.tick.business_date,
            hour_slot: ctx.tick.hour_slot,
            captured_at: ctx.tick.captured_at,
            snapshot: ctx.tick.snapshot(),
            metrics: merged.value,
        };
        self.reports.save_process(&report).await?;

        self.caches.invalidate_category(category).await;
        self.caches
            .process
            .evict(&ProcessCacheKey::ById(report.id))
            .await;
        Ok(Built {
            report,
            overlaps: merged.overlaps,
        })
    }

    pub async fn build_main(
        &self,
        ctx: &TickContext,
        partials: Vec<MainMetrics>,
    ) -> Result<Built<MainReport>, StorageError> {
        let merged = merge_first_non_null(partials);
        log_overlaps("main", &merged.overlaps);

        let report = MainReport {
            id: Uuid::new_v4(),
            business_date: ctx.business_date,
            hour_slot: ctx.hour_slot,
            captured_at: ctx.captured_at,
            snapshot: ctx.snapshot(),
            metrics: merged.value,
        };
        self.reports.save_main(&report).await?;

        let snapshot = report.snapshot;
        let date = report.business_date;
        self.caches
            .main
            .evict_where(|key| match key {
                MainCacheKey::Latest { snapshot: s } => *s == snapshot,
                MainCacheKey::ById(id) => *id == report.id,
                MainCacheKey::Range { range, snapshot: s } => *s == snapshot && range.contains(date),
            })
            .await;
        Ok(Built {
            report,
            overlaps: merged.overlaps,
        })
    }
}

fn log_overlaps(scope: &str, overlaps: &[FieldOverlap]) {
    for overlap in overlaps {
        warn!(
            scope,
            field = overlap.field,
            kept = %overlap.kept,
            dropped = %overlap.dropped,
            "partial reports populated the same field"
        );
    }
}
