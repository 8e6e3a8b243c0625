//! In-process store used by fixture runs and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mkpi_core::{
    CategoryId, EntityType, LotKey, LotTrackingEntry, MainReport, MirroredRecord,
    PerformanceRecord, ProcessReport,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repo::{
    DateRange, LotTrackingRepository, MirrorQuery, MirrorRepository, PerformanceRepository,
    ReportRepository,
};
use crate::StorageError;

#[derive(Debug, Default)]
struct Tables {
    mirrored: Vec<MirroredRecord>,
    lots: BTreeMap<LotKey, LotTrackingEntry>,
    performance: Vec<PerformanceRecord>,
    process_reports: Vec<ProcessReport>,
    main_reports: Vec<MainReport>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mirrored_records(&self) -> Vec<MirroredRecord> {
        self.tables.read().await.mirrored.clone()
    }

    pub async fn performance_records(&self) -> Vec<PerformanceRecord> {
        self.tables.read().await.performance.clone()
    }

    pub async fn process_reports(&self) -> Vec<ProcessReport> {
        self.tables.read().await.process_reports.clone()
    }

    pub async fn main_reports(&self) -> Vec<MainReport> {
        self.tables.read().await.main_reports.clone()
    }

    pub async fn lot_entries(&self) -> Vec<LotTrackingEntry> {
        self.tables.read().await.lots.values().cloned().collect()
    }
}

#[async_trait]
impl MirrorRepository for MemoryStore {
    async fn insert_batch(&self, records: &[MirroredRecord]) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0usize;
        for record in records {
            if tables.mirrored.iter().any(|r| r.id == record.id) {
                continue;
            }
            tables.mirrored.push(record.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn latest(
        &self,
        entity: EntityType,
        snapshot: Option<bool>,
    ) -> Result<Option<MirroredRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .mirrored
            .iter()
            .filter(|r| r.entity_type() == entity)
            .filter(|r| snapshot.map_or(true, |s| r.snapshot == s))
            .max_by_key(|r| r.captured_at)
            .cloned())
    }

    async fn query(&self, query: &MirrorQuery) -> Result<Vec<MirroredRecord>, StorageError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<_> = tables
            .mirrored
            .iter()
            .filter(|r| r.entity_type() == query.entity)
            .filter(|r| r.snapshot == query.snapshot)
            .filter(|r| query.captured.matches(r.captured_at))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.captured_at);
        Ok(rows)
    }
}

#[async_trait]
impl LotTrackingRepository for MemoryStore {
    async fn tracked(&self, category: &CategoryId) -> Result<Vec<LotTrackingEntry>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .lots
            .values()
            .filter(|e| &e.category == category)
            .cloned()
            .collect())
    }

    async fn upsert(&self, entries: &[LotTrackingEntry]) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().await;
        for entry in entries {
            tables.lots.insert(entry.key(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn remove(&self, keys: &[LotKey]) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().await;
        Ok(keys
            .iter()
            .filter(|key| tables.lots.remove(*key).is_some())
            .count())
    }
}

#[async_trait]
impl PerformanceRepository for MemoryStore {
    async fn insert_batch(&self, records: &[PerformanceRecord]) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().await;
        tables.performance.extend(records.iter().cloned());
        Ok(records.len())
    }
}

#[async_trait]
impl ReportRepository for MemoryStore {
    async fn save_process(&self, report: &ProcessReport) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.process_reports.iter().any(|r| r.id == report.id) {
            tables.process_reports.push(report.clone());
        }
        Ok(())
    }

    async fn save_main(&self, report: &MainReport) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.main_reports.iter().any(|r| r.id == report.id) {
            tables.main_reports.push(report.clone());
        }
        Ok(())
    }

    async fn process_by_id(&self, id: Uuid) -> Result<Option<ProcessReport>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.process_reports.iter().find(|r| r.id == id).cloned())
    }

    async fn main_by_id(&self, id: Uuid) -> Result<Option<MainReport>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.main_reports.iter().find(|r| r.id == id).cloned())
    }

    async fn latest_process(
        &self,
        category: &CategoryId,
        snapshot: bool,
    ) -> Result<Option<ProcessReport>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .process_reports
            .iter()
            .filter(|r| &r.category == category && r.snapshot == snapshot)
            .max_by_key(|r| r.captured_at)
            .cloned())
    }

    async fn latest_main(&self, snapshot: bool) -> Result<Option<MainReport>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .main_reports
            .iter()
            .filter(|r| r.snapshot == snapshot)
            .max_by_key(|r| r.captured_at)
            .cloned())
    }

    async fn process_in_range(
        &self,
        category: Option<&CategoryId>,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<ProcessReport>, StorageError> {
        let tables = self.tables.read().await;
        let mut out: Vec<_> = tables
            .process_reports
            .iter()
            .filter(|r| category.map_or(true, |c| &r.category == c))
            .filter(|r| r.snapshot == snapshot && range.contains(r.business_date))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.captured_at);
        Ok(out)
    }

    async fn main_in_range(
        &self,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<MainReport>, StorageError> {
        let tables = self.tables.read().await;
        let mut out: Vec<_> = tables
            .main_reports
            .iter()
            .filter(|r| r.snapshot == snapshot && range.contains(r.business_date))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.captured_at);
        Ok(out)
    }
}
