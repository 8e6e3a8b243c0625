//! Raw source rows to typed payloads.
//!
//! Missing or malformed fields become zero / empty sentinels. Output quantities
//! are the exception: they stay `None` so the lot-state fallback can see them.

use chrono::{DateTime, NaiveDate, Utc};
use mkpi_core::{
    AttendanceRow, AttendanceStatus, CategoryId, CostMasterRow, EntityType, LaborInputRow,
    LotResultRow, LotState, LotStatusRow, Payload, ProductionCountRow,
};
use serde_json::Value as JsonValue;

use crate::RawRow;

pub fn decode_row(entity: EntityType, row: &RawRow) -> Payload {
    match entity {
        EntityType::ProductionCount => Payload::ProductionCount(ProductionCountRow {
            lot_no: text(row, "lot_no"),
            category: category(row),
            part_code: text(row, "part_code"),
            plan_qty: int(row, "plan_qty"),
            input_qty: int(row, "input_qty"),
            output_qty: opt_int(row, "output_qty"),
            recorded_at: timestamp(row, "recorded_at"),
        }),
        EntityType::LotStatus => Payload::LotStatus(LotStatusRow {
            lot_no: text(row, "lot_no"),
            category: category(row),
            part_code: text(row, "part_code"),
            state: LotState::from_label(&text(row, "state")),
            plan_qty: int(row, "plan_qty"),
            input_qty: int(row, "input_qty"),
            output_qty: opt_int(row, "output_qty"),
        }),
        EntityType::Attendance => Payload::Attendance(AttendanceRow {
            employee_id: text(row, "employee_id"),
            category: category(row),
            status: AttendanceStatus::from_label(&text(row, "status")),
            regular_hours: float(row, "regular_hours"),
            overtime_hours: float(row, "overtime_hours"),
        }),
        EntityType::LaborInput => Payload::LaborInput(LaborInputRow {
            category: category(row),
            direct_hours: float(row, "direct_hours"),
            indirect_hours: float(row, "indirect_hours"),
            loss_hours: float(row, "loss_hours"),
            support_in_hours: float(row, "support_in_hours"),
            support_out_hours: float(row, "support_out_hours"),
        }),
        EntityType::LotResult => Payload::LotResult(LotResultRow {
            lot_no: text(row, "lot_no"),
            category: category(row),
            input_qty: int(row, "input_qty"),
            completed_qty: int(row, "completed_qty"),
            defect_qty: int(row, "defect_qty"),
        }),
        EntityType::CostMaster => Payload::CostMaster(CostMasterRow {
            part_code: text(row, "part_code"),
            unit_material_cost: float(row, "unit_material_cost"),
            unit_processing_cost: float(row, "unit_processing_cost"),
            standard_minutes: float(row, "standard_minutes"),
            latest: flag(row, "latest"),
            effective_from: date(row, "effective_from"),
        }),
    }
}

pub fn decode_rows(entity: EntityType, rows: &[RawRow]) -> Vec<Payload> {
    rows.iter().map(|row| decode_row(entity, row)).collect()
}

/// Timestamp a windowed row was recorded at, if it carries one.
pub fn recorded_at(row: &RawRow) -> Option<DateTime<Utc>> {
    timestamp(row, "recorded_at")
}

fn category(row: &RawRow) -> CategoryId {
    CategoryId::new(text(row, "category"))
}

fn text(row: &RawRow, key: &str) -> String {
    match row.get(key) {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn opt_float(row: &RawRow, key: &str) -> Option<f64> {
    let value: Option<f64> = match row.get(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn float(row: &RawRow, key: &str) -> f64 {
    opt_float(row, key).unwrap_or(0.0)
}

fn opt_int(row: &RawRow, key: &str) -> Option<i64> {
    opt_float(row, key).map(|v| v.round() as i64)
}

fn int(row: &RawRow, key: &str) -> i64 {
    opt_int(row, key).unwrap_or(0)
}

fn flag(row: &RawRow, key: &str) -> bool {
    match row.get(key) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_i64() == Some(1),
        Some(JsonValue::String(s)) => matches!(s.trim(), "Y" | "y" | "1" | "true" | "TRUE"),
        _ => false,
    }
}

fn timestamp(row: &RawRow, key: &str) -> Option<DateTime<Utc>> {
    let raw = row.get(key)?.as_str()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn date(row: &RawRow, key: &str) -> Option<NaiveDate> {
    let raw = row.get(key)?.as_str()?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}
