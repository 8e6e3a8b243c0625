//! Report read contracts, get-or-compute through the report caches.
//!
//! A miss only ever queries the repository; metrics are computed by ticks alone.

use std::sync::Arc;

use mkpi_core::{CategoryId, MainReport, ProcessReport};
use mkpi_storage::{
    CacheTier, DateRange, MainCacheKey, ProcessCacheKey, ReportCaches, ReportRepository,
    StorageError,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct ReportReader {
    reports: Arc<dyn ReportRepository>,
    caches: Arc<ReportCaches>,
}

fn range_tier(snapshot: bool) -> CacheTier {
    if snapshot {
        CacheTier::Long
    } else {
        CacheTier::Short
    }
}

impl ReportReader {
    pub fn new(reports: Arc<dyn ReportRepository>, caches: Arc<ReportCaches>) -> Self {
        Self { reports, caches }
    }

    /// Newest report of a category for the snapshot flag.
    pub async fn latest_process(
        &self,
        category: &CategoryId,
        snapshot: bool,
    ) -> Result<Option<ProcessReport>, StorageError> {
        let key = ProcessCacheKey::Latest {
            category: category.clone(),
            snapshot,
        };
        let rows = self
            .caches
            .process
            .get_or_compute(key, range_tier(snapshot), || async {
                Ok::<_, StorageError>(
                    self.reports
                        .latest_process(category, snapshot)
                        .await?
                        .into_iter()
                        .collect(),
                )
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn latest_main(&self, snapshot: bool) -> Result<Option<MainReport>, StorageError> {
        let rows = self
            .caches
            .main
            .get_or_compute(MainCacheKey::Latest { snapshot }, range_tier(snapshot), || async {
                Ok::<_, StorageError>(self.reports.latest_main(snapshot).await?.into_iter().collect())
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn process_by_id(&self, id: Uuid) -> Result<Option<ProcessReport>, StorageError> {
        let rows = self
            .caches
            .process
            .get_or_compute(ProcessCacheKey::ById(id), CacheTier::Long, || async {
                Ok::<_, StorageError>(self.reports.process_by_id(id).await?.into_iter().collect())
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn main_by_id(&self, id: Uuid) -> Result<Option<MainReport>, StorageError> {
        let rows = self
            .caches
            .main
            .get_or_compute(MainCacheKey::ById(id), CacheTier::Long, || async {
                Ok::<_, StorageError>(self.reports.main_by_id(id).await?.into_iter().collect())
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn process_in_range(
        &self,
        category: &CategoryId,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<ProcessReport>, StorageError> {
        let key = ProcessCacheKey::Range {
            category: category.clone(),
            range,
            snapshot,
        };
        self.caches
            .process
            .get_or_compute(key, range_tier(snapshot), || {
                self.reports.process_in_range(Some(category), range, snapshot)
            })
            .await
    }

    pub async fn main_in_range(
        &self,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<MainReport>, StorageError> {
        self.caches
            .main
            .get_or_compute(
                MainCacheKey::Range { range, snapshot },
                range_tier(snapshot),
                || self.reports.main_in_range(range, snapshot),
            )
            .await
    }
}
