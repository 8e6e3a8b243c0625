//! PostgreSQL-backed repositories (sqlx, runtime-checked queries).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mkpi_core::{
    CategoryId, EntityType, LotKey, LotTrackingEntry, MainMetrics, MainReport, MirroredRecord,
    Payload, PerformanceRecord, ProcessMetrics, ProcessReport, SourceSystem,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::repo::{
    CaptureFilter, DateRange, LotTrackingRepository, MirrorQuery, MirrorRepository,
    PerformanceRepository, ReportRepository,
};
use crate::StorageError;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn mirrored_from_row(row: &PgRow) -> Result<MirroredRecord, StorageError> {
    let source: String = row.try_get("source_system")?;
    let source = SourceSystem::parse(&source).ok_or_else(|| StorageError::Corrupt {
        table: "mirrored_records",
        message: format!("unknown source system {source}"),
    })?;
    let Json(payload): Json<Payload> = row.try_get("payload")?;
    Ok(MirroredRecord {
        id: row.try_get("id")?,
        source,
        captured_at: row.try_get("captured_at")?,
        snapshot: row.try_get("snapshot")?,
        payload,
    })
}

fn lot_entry_from_row(row: &PgRow) -> Result<LotTrackingEntry, StorageError> {
    Ok(LotTrackingEntry {
        lot_no: row.try_get("lot_no")?,
        category: CategoryId::new(row.try_get::<String, _>("category")?),
        part_code: row.try_get("part_code")?,
        in_progress: row.try_get("in_progress")?,
        plan_qty: row.try_get("plan_qty")?,
        output_qty: row.try_get("output_qty")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn hour_slot(row: &PgRow) -> Result<u32, StorageError> {
    let slot: i32 = row.try_get("hour_slot")?;
    u32::try_from(slot).map_err(|_| StorageError::Corrupt {
        table: "reports",
        message: format!("negative hour slot {slot}"),
    })
}

fn process_from_row(row: &PgRow) -> Result<ProcessReport, StorageError> {
    let Json(metrics): Json<ProcessMetrics> = row.try_get("metrics")?;
    Ok(ProcessReport {
        id: row.try_get("id")?,
        category: CategoryId::new(row.try_get::<String, _>("category")?),
        business_date: row.try_get("business_date")?,
        hour_slot: hour_slot(row)?,
        captured_at: row.try_get("captured_at")?,
        snapshot: row.try_get("snapshot")?,
        metrics,
    })
}

fn main_from_row(row: &PgRow) -> Result<MainReport, StorageError> {
    let Json(metrics): Json<MainMetrics> = row.try_get("metrics")?;
    Ok(MainReport {
        id: row.try_get("id")?,
        business_date: row.try_get("business_date")?,
        hour_slot: hour_slot(row)?,
        captured_at: row.try_get("captured_at")?,
        snapshot: row.try_get("snapshot")?,
        metrics,
    })
}

const PROCESS_COLUMNS: &str =
    "id, category, business_date, hour_slot, captured_at, snapshot, metrics";
const MAIN_COLUMNS: &str = "id, business_date, hour_slot, captured_at, snapshot, metrics";

#[async_trait]
impl MirrorRepository for PgStore {
    async fn insert_batch(&self, records: &[MirroredRecord]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO mirrored_records \
                 (id, source_system, entity_type, category, captured_at, snapshot, payload) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
            )
            .bind(record.id)
            .bind(record.source.as_str())
            .bind(record.entity_type().as_str())
            .bind(record.category().map(|c| c.as_str().to_string()))
            .bind(record.captured_at)
            .bind(record.snapshot)
            .bind(Json(&record.payload))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted as usize)
    }

    async fn latest(
        &self,
        entity: EntityType,
        snapshot: Option<bool>,
    ) -> Result<Option<MirroredRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT id, source_system, captured_at, snapshot, payload FROM mirrored_records \
             WHERE entity_type = $1 AND ($2::BOOLEAN IS NULL OR snapshot = $2) \
             ORDER BY captured_at DESC LIMIT 1",
        )
        .bind(entity.as_str())
        .bind(snapshot)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(mirrored_from_row).transpose()
    }

    async fn query(&self, query: &MirrorQuery) -> Result<Vec<MirroredRecord>, StorageError> {
        let (start, end): (DateTime<Utc>, Option<DateTime<Utc>>) = match query.captured {
            CaptureFilter::Window(window) => (window.start, Some(window.end)),
            CaptureFilter::At(ts) => (ts, None),
        };
        let rows = sqlx::query(
            "SELECT id, source_system, captured_at, snapshot, payload FROM mirrored_records \
             WHERE entity_type = $1 AND snapshot = $2 \
             AND ((($4::TIMESTAMPTZ IS NULL) AND captured_at = $3) \
               OR (($4::TIMESTAMPTZ IS NOT NULL) AND captured_at >= $3 AND captured_at < $4)) \
             ORDER BY captured_at",
        )
        .bind(query.entity.as_str())
        .bind(query.snapshot)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mirrored_from_row).collect()
    }
}

#[async_trait]
impl LotTrackingRepository for PgStore {
    async fn tracked(&self, category: &CategoryId) -> Result<Vec<LotTrackingEntry>, StorageError> {
        let rows = sqlx::query(
            "SELECT lot_no, category, part_code, in_progress, plan_qty, output_qty, updated_at \
             FROM lot_tracking WHERE category = $1 ORDER BY lot_no",
        )
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(lot_entry_from_row).collect()
    }

    async fn upsert(&self, entries: &[LotTrackingEntry]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query("DELETE FROM lot_tracking WHERE lot_no = $1 AND category = $2")
                .bind(&entry.lot_no)
                .bind(entry.category.as_str())
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO lot_tracking \
                 (lot_no, category, part_code, in_progress, plan_qty, output_qty, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&entry.lot_no)
            .bind(entry.category.as_str())
            .bind(&entry.part_code)
            .bind(entry.in_progress)
            .bind(entry.plan_qty)
            .bind(entry.output_qty)
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(entries.len())
    }

    async fn remove(&self, keys: &[LotKey]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for key in keys {
            removed += sqlx::query("DELETE FROM lot_tracking WHERE lot_no = $1 AND category = $2")
                .bind(&key.lot_no)
                .bind(key.category.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }
}

#[async_trait]
impl PerformanceRepository for PgStore {
    async fn insert_batch(&self, records: &[PerformanceRecord]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO performance_records \
                 (id, category, lot_no, captured_at, snapshot, record) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
            )
            .bind(record.id)
            .bind(record.category.as_str())
            .bind(&record.lot_no)
            .bind(record.captured_at)
            .bind(record.snapshot)
            .bind(Json(record))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }
}

#[async_trait]
impl ReportRepository for PgStore {
    async fn save_process(&self, report: &ProcessReport) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO process_reports \
             (id, category, business_date, hour_slot, captured_at, snapshot, metrics) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
        )
        .bind(report.id)
        .bind(report.category.as_str())
        .bind(report.business_date)
        .bind(report.hour_slot as i32)
        .bind(report.captured_at)
        .bind(report.snapshot)
        .bind(Json(&report.metrics))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_main(&self, report: &MainReport) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO main_reports \
             (id, business_date, hour_slot, captured_at, snapshot, metrics) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(report.id)
        .bind(report.business_date)
        .bind(report.hour_slot as i32)
        .bind(report.captured_at)
        .bind(report.snapshot)
        .bind(Json(&report.metrics))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn process_by_id(&self, id: Uuid) -> Result<Option<ProcessReport>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {PROCESS_COLUMNS} FROM process_reports WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(process_from_row).transpose()
    }

    async fn main_by_id(&self, id: Uuid) -> Result<Option<MainReport>, StorageError> {
        let row = sqlx::query(&format!("SELECT {MAIN_COLUMNS} FROM main_reports WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(main_from_row).transpose()
    }

    async fn latest_process(
        &self,
        category: &CategoryId,
        snapshot: bool,
    ) -> Result<Option<ProcessReport>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {PROCESS_COLUMNS} FROM process_reports \
             WHERE category = $1 AND snapshot = $2 ORDER BY captured_at DESC LIMIT 1"
        ))
        .bind(category.as_str())
        .bind(snapshot)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(process_from_row).transpose()
    }

    async fn latest_main(&self, snapshot: bool) -> Result<Option<MainReport>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {MAIN_COLUMNS} FROM main_reports \
             WHERE snapshot = $1 ORDER BY captured_at DESC LIMIT 1"
        ))
        .bind(snapshot)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(main_from_row).transpose()
    }

    async fn process_in_range(
        &self,
        category: Option<&CategoryId>,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<ProcessReport>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROCESS_COLUMNS} FROM process_reports \
             WHERE ($1::TEXT IS NULL OR category = $1) AND snapshot = $2 \
             AND business_date BETWEEN $3 AND $4 ORDER BY captured_at"
        ))
        .bind(category.map(|c| c.as_str().to_string()))
        .bind(snapshot)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(process_from_row).collect()
    }

    async fn main_in_range(
        &self,
        range: DateRange,
        snapshot: bool,
    ) -> Result<Vec<MainReport>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {MAIN_COLUMNS} FROM main_reports \
             WHERE snapshot = $1 AND business_date BETWEEN $2 AND $3 ORDER BY captured_at"
        ))
        .bind(snapshot)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(main_from_row).collect()
    }
}
