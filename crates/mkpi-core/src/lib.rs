//! Core domain model for the manufacturing KPI sync pipeline.

mod metrics;

use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use metrics::{
    merge_first_non_null, AttendanceMetrics, FieldOverlap, MainMetrics, MergeFields, Merged,
    ProcessMetrics,
};

pub const CRATE_NAME: &str = "mkpi-core";

/// Identifier of one manufacturing stage/line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

impl CategoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub display_name: String,
}

impl Category {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: CategoryId::new(id),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    /// Manufacturing-execution system.
    Mes,
    /// Enterprise-resource system.
    Erp,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Mes => "mes",
            SourceSystem::Erp => "erp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mes" => Some(SourceSystem::Mes),
            "erp" => Some(SourceSystem::Erp),
            _ => None,
        }
    }

    pub fn entity_types(&self) -> &'static [EntityType] {
        match self {
            SourceSystem::Mes => &[
                EntityType::ProductionCount,
                EntityType::LotStatus,
                EntityType::Attendance,
                EntityType::LaborInput,
            ],
            SourceSystem::Erp => &[EntityType::LotResult, EntityType::CostMaster],
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// Rows carry a timestamp and are pulled incrementally by time window.
    Windowed,
    /// Full current state on every pull.
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    ProductionCount,
    LotStatus,
    Attendance,
    LaborInput,
    LotResult,
    CostMaster,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::ProductionCount,
        EntityType::LotStatus,
        EntityType::Attendance,
        EntityType::LaborInput,
        EntityType::LotResult,
        EntityType::CostMaster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::ProductionCount => "production_count",
            EntityType::LotStatus => "lot_status",
            EntityType::Attendance => "attendance",
            EntityType::LaborInput => "labor_input",
            EntityType::LotResult => "lot_result",
            EntityType::CostMaster => "cost_master",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == value)
    }

    pub fn source_system(&self) -> SourceSystem {
        match self {
            EntityType::ProductionCount
            | EntityType::LotStatus
            | EntityType::Attendance
            | EntityType::LaborInput => SourceSystem::Mes,
            EntityType::LotResult | EntityType::CostMaster => SourceSystem::Erp,
        }
    }

    pub fn pull_mode(&self) -> PullMode {
        match self {
            EntityType::ProductionCount | EntityType::LaborInput | EntityType::LotResult => {
                PullMode::Windowed
            }
            EntityType::LotStatus | EntityType::Attendance | EntityType::CostMaster => {
                PullMode::Current
            }
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotState {
    Queued,
    InProduction,
    Completed,
}

impl LotState {
    /// Lenient mapping of source-system state labels; unknown labels read as queued.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "completed" | "complete" | "done" | "finished" => LotState::Completed,
            "in_production" | "in_progress" | "running" | "producing" => LotState::InProduction,
            _ => LotState::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Leave,
}

impl AttendanceStatus {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "late" | "tardy" => AttendanceStatus::Late,
            "absent" | "no_show" => AttendanceStatus::Absent,
            "leave" | "vacation" | "holiday" | "sick" => AttendanceStatus::Leave,
            _ => AttendanceStatus::Present,
        }
    }

    pub fn is_attending(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionCountRow {
    pub lot_no: String,
    pub category: CategoryId,
    pub part_code: String,
    pub plan_qty: i64,
    pub input_qty: i64,
    pub output_qty: Option<i64>,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Row from the lot-tracking system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotStatusRow {
    pub lot_no: String,
    pub category: CategoryId,
    pub part_code: String,
    pub state: LotState,
    pub plan_qty: i64,
    pub input_qty: i64,
    pub output_qty: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRow {
    pub employee_id: String,
    pub category: CategoryId,
    pub status: AttendanceStatus,
    pub regular_hours: f64,
    pub overtime_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaborInputRow {
    pub category: CategoryId,
    pub direct_hours: f64,
    pub indirect_hours: f64,
    pub loss_hours: f64,
    pub support_in_hours: f64,
    pub support_out_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotResultRow {
    pub lot_no: String,
    pub category: CategoryId,
    pub input_qty: i64,
    pub completed_qty: i64,
    pub defect_qty: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMasterRow {
    pub part_code: String,
    pub unit_material_cost: f64,
    pub unit_processing_cost: f64,
    pub standard_minutes: f64,
    pub latest: bool,
    pub effective_from: Option<NaiveDate>,
}

/// Source-specific typed fields of a mirrored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "fields", rename_all = "snake_case")]
pub enum Payload {
    ProductionCount(ProductionCountRow),
    LotStatus(LotStatusRow),
    Attendance(AttendanceRow),
    LaborInput(LaborInputRow),
    LotResult(LotResultRow),
    CostMaster(CostMasterRow),
}

impl Payload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Payload::ProductionCount(_) => EntityType::ProductionCount,
            Payload::LotStatus(_) => EntityType::LotStatus,
            Payload::Attendance(_) => EntityType::Attendance,
            Payload::LaborInput(_) => EntityType::LaborInput,
            Payload::LotResult(_) => EntityType::LotResult,
            Payload::CostMaster(_) => EntityType::CostMaster,
        }
    }

    /// Category the row belongs to; cost master rows are category-independent.
    pub fn category(&self) -> Option<&CategoryId> {
        match self {
            Payload::ProductionCount(row) => Some(&row.category),
            Payload::LotStatus(row) => Some(&row.category),
            Payload::Attendance(row) => Some(&row.category),
            Payload::LaborInput(row) => Some(&row.category),
            Payload::LotResult(row) => Some(&row.category),
            Payload::CostMaster(_) => None,
        }
    }
}

/// Append-only local copy of one externally-sourced row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredRecord {
    pub id: Uuid,
    pub source: SourceSystem,
    pub captured_at: DateTime<Utc>,
    pub snapshot: bool,
    pub payload: Payload,
}

impl MirroredRecord {
    pub fn new(captured_at: DateTime<Utc>, snapshot: bool, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: payload.entity_type().source_system(),
            captured_at,
            snapshot,
            payload,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    pub fn category(&self) -> Option<&CategoryId> {
        self.payload.category()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotKey {
    pub lot_no: String,
    pub category: CategoryId,
}

/// Side-table row used to detect in-progress to completed transitions across ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotTrackingEntry {
    pub lot_no: String,
    pub category: CategoryId,
    pub part_code: String,
    pub in_progress: bool,
    pub plan_qty: i64,
    pub output_qty: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl LotTrackingEntry {
    pub fn key(&self) -> LotKey {
        LotKey {
            lot_no: self.lot_no.clone(),
            category: self.category.clone(),
        }
    }
}

/// One lot's quantities and costs for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub id: Uuid,
    pub lot_no: String,
    pub category: CategoryId,
    pub part_code: String,
    pub state: LotState,
    pub captured_at: DateTime<Utc>,
    pub snapshot: bool,
    pub plan_qty: i64,
    pub input_qty: i64,
    pub completed_qty: i64,
    pub defect_qty: i64,
    pub wip_qty: i64,
    pub defect_rate: f64,
    pub achievement_rate: f64,
    pub unit_material_cost: f64,
    pub unit_processing_cost: f64,
    pub standard_minutes: f64,
    pub material_cost: f64,
    pub processing_cost: f64,
    pub defect_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub id: Uuid,
    pub category: CategoryId,
    pub business_date: NaiveDate,
    pub hour_slot: u32,
    pub captured_at: DateTime<Utc>,
    pub snapshot: bool,
    pub metrics: ProcessMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainReport {
    pub id: Uuid,
    pub business_date: NaiveDate,
    pub hour_slot: u32,
    pub captured_at: DateTime<Utc>,
    pub snapshot: bool,
    pub metrics: MainMetrics,
}

/// Half-open `[start, end)` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    Live,
    Snapshot,
}

/// Immutable per-tick context threaded through every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickContext {
    pub run_id: Uuid,
    pub kind: TickKind,
    /// Tick time truncated to whole seconds; stamped on every row the tick writes.
    pub captured_at: DateTime<Utc>,
    pub utc_offset: FixedOffset,
    pub business_date: NaiveDate,
    pub hour_slot: u32,
    pub day_start: DateTime<Utc>,
}

impl TickContext {
    pub fn new(kind: TickKind, now: DateTime<Utc>, utc_offset: FixedOffset) -> Self {
        let captured_at = now.with_nanosecond(0).unwrap_or(now);
        let business_date = local_date(captured_at, utc_offset);
        Self {
            run_id: Uuid::new_v4(),
            kind,
            captured_at,
            utc_offset,
            business_date,
            hour_slot: local_hour(captured_at, utc_offset),
            day_start: local_midnight(business_date, utc_offset),
        }
    }

    pub fn snapshot(&self) -> bool {
        self.kind == TickKind::Snapshot
    }

    /// The whole local business day.
    pub fn day_window(&self) -> TimeWindow {
        TimeWindow::new(self.day_start, self.day_start + Duration::days(1))
    }

    /// True when `ts` falls in the same local date and hour as this tick.
    pub fn same_hour_slot(&self, ts: DateTime<Utc>) -> bool {
        local_date(ts, self.utc_offset) == self.business_date
            && local_hour(ts, self.utc_offset) == self.hour_slot
    }

    pub fn for_category<'a>(&'a self, category: &'a Category) -> CategoryContext<'a> {
        CategoryContext {
            tick: self,
            category,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CategoryContext<'a> {
    pub tick: &'a TickContext,
    pub category: &'a Category,
}

pub fn local_date(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

pub fn local_hour(ts: DateTime<Utc>, offset: FixedOffset) -> u32 {
    ts.with_timezone(&offset).hour()
}

pub fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN) - Duration::seconds(offset.local_minus_utc() as i64);
    Utc.from_utc_datetime(&naive)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).expect("offset")
    }

    #[test]
    fn tick_context_uses_local_business_day() {
        // 2026-03-02 16:30 UTC is 2026-03-03 01:30 at +09:00.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 16, 30, 12).unwrap();
        let ctx = TickContext::new(TickKind::Live, now, kst());
        assert_eq!(ctx.business_date, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        assert_eq!(ctx.hour_slot, 1);
        assert_eq!(ctx.day_start, Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
        assert!(ctx.day_window().contains(now));
        assert!(!ctx.snapshot());
    }

    #[test]
    fn captured_at_is_truncated_to_seconds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 5).unwrap() + Duration::milliseconds(750);
        let ctx = TickContext::new(TickKind::Snapshot, now, kst());
        assert_eq!(ctx.captured_at, Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 5).unwrap());
        assert!(ctx.snapshot());
    }

    #[test]
    fn same_hour_slot_requires_matching_date() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let ctx = TickContext::new(
            TickKind::Live,
            Utc.with_ymd_and_hms(2026, 3, 3, 10, 40, 0).unwrap(),
            offset,
        );
        assert!(ctx.same_hour_slot(Utc.with_ymd_and_hms(2026, 3, 3, 10, 0, 0).unwrap()));
        assert!(!ctx.same_hour_slot(Utc.with_ymd_and_hms(2026, 3, 3, 9, 59, 59).unwrap()));
        assert!(!ctx.same_hour_slot(Utc.with_ymd_and_hms(2026, 3, 2, 10, 10, 0).unwrap()));
    }

    #[test]
    fn payload_serializes_with_entity_tag() {
        let payload = Payload::LaborInput(LaborInputRow {
            category: CategoryId::new("ASSY"),
            direct_hours: 8.0,
            indirect_hours: 1.0,
            loss_hours: 0.5,
            support_in_hours: 0.0,
            support_out_hours: 0.0,
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["entity_type"], "labor_input");
        assert_eq!(json["fields"]["category"], "ASSY");
        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back.entity_type(), EntityType::LaborInput);
    }

    #[test]
    fn lot_state_labels_are_lenient() {
        assert_eq!(LotState::from_label("In Production"), LotState::InProduction);
        assert_eq!(LotState::from_label("COMPLETED"), LotState::Completed);
        assert_eq!(LotState::from_label("whatever"), LotState::Queued);
    }

    #[test]
    fn entity_catalogue_is_consistent() {
        for source in [SourceSystem::Mes, SourceSystem::Erp] {
            for entity in source.entity_types() {
                assert_eq!(entity.source_system(), source);
                assert_eq!(EntityType::parse(entity.as_str()), Some(*entity));
            }
        }
    }
}
