//! Persistence seams: query-by-window, query-by-id and save, per record family.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mkpi_core::{
    CategoryId, EntityType, LotKey, LotTrackingEntry, MainReport, MirroredRecord,
    PerformanceRecord, ProcessReport, TimeWindow,
};
use uuid::Uuid;

use crate::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFilter {
    Window(TimeWindow),
    /// Rows written by exactly one tick.
    At(DateTime<Utc>),
}

impl CaptureFilter {
    pub fn matches(&self, captured_at: DateTime<Utc>) -> bool {
        match self {
            CaptureFilter::Window(window) => window.contains(captured_at),
            CaptureFilter::At(ts) => *ts == captured_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorQuery {
    pub entity: EntityType,
    pub captured: CaptureFilter,
    pub snapshot: bool,
}

/// Inclusive range of business dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

/// Append-only mirror of source rows.
#[async_trait]
pub trait MirrorRepository: Send + Sync {
    async fn insert_batch(&self, records: &[MirroredRecord]) -> Result<usize, StorageError>;

    /// Most recently captured row of an entity type, optionally restricted by snapshot flag.
    async fn latest(
        &self,
        entity: EntityType,
        snapshot: Option<bool>,
    ) -> Result<Option<MirroredRecord>, StorageError>;

    async fn query(&self, query: &MirrorQuery) -> Result<Vec<MirroredRecord>, StorageError>;
}

/// The only mutable table: one row per tracked (lot, category).
#[async_trait]
pub trait LotTrackingRepository: Send + Sync {
    async fn tracked(&self, category: &CategoryId) -> Result<Vec<LotTrackingEntry>, StorageError>;

    /// Replaces existing entries with the same key.
    async fn upsert(&self, entries: &[LotTrackingEntry]) -> Result<usize, StorageError>;

    async fn remove(&self, keys: &[LotKey]) -> Result<usize, StorageError>;
}

#[async_trait]
pub trait PerformanceRepository: Send + Sync {
    async fn insert_batch(&self, records: &[PerformanceRecord]) -> Result<usize, StorageError>;
}

/// Report records are written once and never revised.
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn save_process(&self, report: &ProcessReport) -> Result<(), StorageError>;
    async fn save_main(&self, report: &MainReport) -> Result<(), StorageError>;

    async fn process_by_id(&self, id: Uuid) -> Result<Option<ProcessReport>, StorageError>;
    async fn main_by_id(&self, id: Uuid) -> Result<Option<MainReport>, StorageError>;

    async fn latest_process(
        &self,
        category: &CategoryId,
        snapshot: bool,
    ) -> Result<Option<ProcessReport>, StorageError>;
    async fn latest_main(&self, snapshot: bool) -> Result<Option<MainReport>, StorageError>;

    /// Ordered by capture time; `category = None` returns every category.
    async fn process_in_range(
        &self,
        category: Option<&CategoryId>,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<ProcessReport>, StorageError>;
    async fn main_in_range(
        &self,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<MainReport>, StorageError>;
}

#[derive(Clone)]
pub struct Repositories {
    pub mirror: Arc<dyn MirrorRepository>,
    pub lots: Arc<dyn LotTrackingRepository>,
    pub performance: Arc<dyn PerformanceRepository>,
    pub reports: Arc<dyn ReportRepository>,
}

impl Repositories {
    /// Uses one backing store for every record family.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: MirrorRepository
            + LotTrackingRepository
            + PerformanceRepository
            + ReportRepository
            + 'static,
    {
        Self {
            mirror: store.clone(),
            lots: store.clone(),
            performance: store.clone(),
            reports: store,
        }
    }
}
