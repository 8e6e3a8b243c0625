//! Derived metrics engine.
//!
//! Every function here is a pure reduction over rows already mirrored for a tick.
//! Data-shape anomalies are absorbed with zero defaults; nothing in this crate fails.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use mkpi_core::{
    AttendanceMetrics, AttendanceRow, AttendanceStatus, CategoryContext, CategoryId,
    CostMasterRow, LaborInputRow, LotKey, LotResultRow, LotState, LotStatusRow,
    LotTrackingEntry, MainMetrics, MirroredRecord, Payload, PerformanceRecord, ProcessMetrics,
    ProcessReport, ProductionCountRow, TickContext,
};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mkpi-metrics";

/// `round(numerator / denominator * 100)`, or 0 when the denominator is zero.
///
/// Results are not clamped to `[0, 100]`.
pub fn percent(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let value = (numerator / denominator * 100.0).round();
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Plain quotient rounded to two decimals, or 0 when the denominator is zero.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    round2(numerator / denominator)
}

fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.is_finite() {
        rounded
    } else {
        0.0
    }
}

pub fn defect_rate(input_qty: i64, defect_qty: i64) -> f64 {
    percent(defect_qty as f64, input_qty as f64)
}

pub fn achievement_rate(plan_qty: i64, completed_qty: i64) -> f64 {
    percent(completed_qty as f64, plan_qty as f64)
}

pub fn yield_rate(input_qty: i64, completed_qty: i64) -> f64 {
    percent(completed_qty as f64, input_qty as f64)
}

/// Work in progress; may be negative.
pub fn wip_qty(completed_qty: i64, input_qty: i64) -> i64 {
    completed_qty.saturating_sub(input_qty)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitCost {
    pub unit_material_cost: f64,
    pub unit_processing_cost: f64,
    pub standard_minutes: f64,
}

/// Effective unit cost per part code, taken from rows flagged as latest.
#[derive(Debug, Clone, Default)]
pub struct CostIndex {
    by_part: HashMap<String, (Option<chrono::NaiveDate>, UnitCost)>,
}

impl CostIndex {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a CostMasterRow>) -> Self {
        let mut by_part: HashMap<String, (Option<chrono::NaiveDate>, UnitCost)> = HashMap::new();
        for row in rows.into_iter().filter(|r| r.latest) {
            let cost = UnitCost {
                unit_material_cost: row.unit_material_cost,
                unit_processing_cost: row.unit_processing_cost,
                standard_minutes: row.standard_minutes,
            };
            let newer = by_part
                .get(&row.part_code)
                .map_or(true, |(existing, _)| *existing <= row.effective_from);
            if newer {
                by_part.insert(row.part_code.clone(), (row.effective_from, cost));
            }
        }
        Self { by_part }
    }

    /// Unknown part codes cost nothing.
    pub fn lookup(&self, part_code: &str) -> UnitCost {
        self.by_part
            .get(part_code)
            .map(|(_, cost)| *cost)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_part.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_part.is_empty()
    }
}

/// Mirrored rows of one tick window, split by entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub production_counts: Vec<ProductionCountRow>,
    pub lot_statuses: Vec<LotStatusRow>,
    pub attendance: Vec<AttendanceRow>,
    pub labor_inputs: Vec<LaborInputRow>,
    pub lot_results: Vec<LotResultRow>,
    pub cost_master: Vec<CostMasterRow>,
}

impl RowSet {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a MirroredRecord>) -> Self {
        let mut set = Self::default();
        for record in records {
            set.push(record.payload.clone());
        }
        set
    }

    pub fn push(&mut self, payload: Payload) {
        match payload {
            Payload::ProductionCount(row) => self.production_counts.push(row),
            Payload::LotStatus(row) => self.lot_statuses.push(row),
            Payload::Attendance(row) => self.attendance.push(row),
            Payload::LaborInput(row) => self.labor_inputs.push(row),
            Payload::LotResult(row) => self.lot_results.push(row),
            Payload::CostMaster(row) => self.cost_master.push(row),
        }
    }

    /// Rows of one category; cost master rows are shared by every category.
    pub fn for_category(&self, category: &CategoryId) -> RowSet {
        RowSet {
            production_counts: filter_category(&self.production_counts, category, |r| &r.category),
            lot_statuses: filter_category(&self.lot_statuses, category, |r| &r.category),
            attendance: filter_category(&self.attendance, category, |r| &r.category),
            labor_inputs: filter_category(&self.labor_inputs, category, |r| &r.category),
            lot_results: filter_category(&self.lot_results, category, |r| &r.category),
            cost_master: self.cost_master.clone(),
        }
    }

    pub fn cost_index(&self) -> CostIndex {
        CostIndex::from_rows(&self.cost_master)
    }
}

fn filter_category<T: Clone>(
    rows: &[T],
    category: &CategoryId,
    key: impl Fn(&T) -> &CategoryId,
) -> Vec<T> {
    rows.iter().filter(|r| key(r) == category).cloned().collect()
}

/// A tracked in-progress lot observed as completed during a snapshot tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LotCompletion {
    pub key: LotKey,
    pub plan_qty: i64,
    pub output_qty: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LotReconciliation {
    pub upserts: Vec<LotTrackingEntry>,
    pub completions: Vec<LotCompletion>,
    pub removals: Vec<LotKey>,
}

/// Compares the lot-tracking side table with the current lot states.
///
/// In-production lots are (re)tracked on every tick. Completions are only
/// resolved on snapshot ticks, which also drop the completed lots from tracking.
pub fn reconcile_lots(
    ctx: &TickContext,
    tracked: &[LotTrackingEntry],
    current: &[LotStatusRow],
) -> LotReconciliation {
    let mut out = LotReconciliation::default();
    let mut seen = BTreeSet::new();

    for row in current.iter().filter(|r| r.state == LotState::InProduction) {
        let key = LotKey {
            lot_no: row.lot_no.clone(),
            category: row.category.clone(),
        };
        if !seen.insert(key) {
            continue;
        }
        out.upserts.push(LotTrackingEntry {
            lot_no: row.lot_no.clone(),
            category: row.category.clone(),
            part_code: row.part_code.clone(),
            in_progress: true,
            plan_qty: row.plan_qty,
            output_qty: row.output_qty,
            updated_at: ctx.captured_at,
        });
    }

    if !ctx.snapshot() {
        return out;
    }

    for entry in tracked.iter().filter(|e| e.in_progress) {
        let completed = current.iter().find(|r| {
            r.lot_no == entry.lot_no
                && r.category == entry.category
                && r.state == LotState::Completed
        });
        let Some(row) = completed else {
            continue;
        };
        let plan_qty = if row.plan_qty > 0 {
            row.plan_qty
        } else {
            entry.plan_qty
        };
        out.completions.push(LotCompletion {
            key: entry.key(),
            plan_qty,
            output_qty: row.output_qty.unwrap_or(plan_qty),
        });
        out.removals.push(entry.key());
    }

    out
}

#[derive(Debug, Clone)]
struct LotTotals {
    part_code: String,
    state: LotState,
    plan_qty: i64,
    input_qty: i64,
    output_qty: i64,
    output_reported: bool,
}

fn status_output(row: &LotStatusRow) -> i64 {
    match (row.output_qty, row.state) {
        (Some(qty), _) => qty,
        (None, LotState::Completed) => row.plan_qty,
        (None, LotState::InProduction | LotState::Queued) => 0,
    }
}

fn lot_totals(rows: &RowSet, completions: &[LotCompletion]) -> BTreeMap<String, LotTotals> {
    let mut lots: BTreeMap<String, LotTotals> = BTreeMap::new();
    let status_by_lot: HashMap<&str, LotState> = rows
        .lot_statuses
        .iter()
        .map(|r| (r.lot_no.as_str(), r.state))
        .collect();

    for row in &rows.production_counts {
        let totals = lots.entry(row.lot_no.clone()).or_insert_with(|| LotTotals {
            part_code: row.part_code.clone(),
            state: status_by_lot
                .get(row.lot_no.as_str())
                .copied()
                .unwrap_or(LotState::InProduction),
            plan_qty: 0,
            input_qty: 0,
            output_qty: 0,
            output_reported: false,
        });
        totals.plan_qty = totals.plan_qty.saturating_add(row.plan_qty);
        totals.input_qty = totals.input_qty.saturating_add(row.input_qty);
        if let Some(qty) = row.output_qty {
            totals.output_qty = totals.output_qty.saturating_add(qty);
            totals.output_reported = true;
        }
    }

    let counted: BTreeSet<String> = lots.keys().cloned().collect();
    for row in rows.lot_statuses.iter().filter(|r| !counted.contains(&r.lot_no)) {
        let totals = lots.entry(row.lot_no.clone()).or_insert_with(|| LotTotals {
            part_code: row.part_code.clone(),
            state: row.state,
            plan_qty: 0,
            input_qty: 0,
            output_qty: 0,
            output_reported: false,
        });
        totals.plan_qty = totals.plan_qty.saturating_add(row.plan_qty);
        totals.input_qty = totals.input_qty.saturating_add(row.input_qty);
        totals.output_qty = totals.output_qty.saturating_add(status_output(row));
        totals.output_reported |= row.output_qty.is_some() || row.state != LotState::Completed;
    }

    let counted: BTreeSet<String> = lots.keys().cloned().collect();
    for row in rows.lot_results.iter().filter(|r| !counted.contains(&r.lot_no)) {
        let totals = lots.entry(row.lot_no.clone()).or_insert_with(|| LotTotals {
            part_code: String::new(),
            state: LotState::Completed,
            plan_qty: 0,
            input_qty: 0,
            output_qty: 0,
            output_reported: true,
        });
        totals.input_qty = totals.input_qty.saturating_add(row.input_qty);
        totals.output_qty = totals.output_qty.saturating_add(row.completed_qty);
    }

    for completion in completions {
        let Some(totals) = lots.get_mut(&completion.key.lot_no) else {
            continue;
        };
        totals.state = LotState::Completed;
        if totals.plan_qty == 0 {
            totals.plan_qty = completion.plan_qty;
        }
        if !totals.output_reported {
            totals.output_qty = completion.output_qty;
            totals.output_reported = true;
        }
    }

    lots
}

/// One performance record per lot of the category.
///
/// Daily production counts are the canonical quantities; lots without them fall
/// back to the lot-tracking rows, then to the ERP lot results. Repeated rows for a
/// lot are summed.
pub fn derive_performance(
    ctx: &CategoryContext<'_>,
    rows: &RowSet,
    costs: &CostIndex,
    completions: &[LotCompletion],
) -> Vec<PerformanceRecord> {
    let mut defects: HashMap<&str, i64> = HashMap::new();
    for row in &rows.lot_results {
        let qty = defects.entry(row.lot_no.as_str()).or_default();
        *qty = qty.saturating_add(row.defect_qty);
    }

    lot_totals(rows, completions)
        .into_iter()
        .map(|(lot_no, totals)| {
            let defect_qty = defects.get(lot_no.as_str()).copied().unwrap_or(0);
            let cost = costs.lookup(&totals.part_code);
            let completed_qty = totals.output_qty;
            PerformanceRecord {
                id: Uuid::new_v4(),
                category: ctx.category.id.clone(),
                part_code: totals.part_code,
                state: totals.state,
                captured_at: ctx.tick.captured_at,
                snapshot: ctx.tick.snapshot(),
                plan_qty: totals.plan_qty,
                input_qty: totals.input_qty,
                completed_qty,
                defect_qty,
                wip_qty: wip_qty(completed_qty, totals.input_qty),
                defect_rate: defect_rate(totals.input_qty, defect_qty),
                achievement_rate: achievement_rate(totals.plan_qty, completed_qty),
                unit_material_cost: cost.unit_material_cost,
                unit_processing_cost: cost.unit_processing_cost,
                standard_minutes: cost.standard_minutes,
                material_cost: round2(totals.input_qty as f64 * cost.unit_material_cost),
                processing_cost: round2(completed_qty as f64 * cost.unit_processing_cost),
                defect_cost: round2(
                    defect_qty as f64 * (cost.unit_material_cost + cost.unit_processing_cost),
                ),
                lot_no,
            }
        })
        .collect()
}

/// Additive labor quantities shared by the category and aggregate reductions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LaborTotals {
    pub headcount: i64,
    pub present_count: i64,
    pub regular_hours: f64,
    pub overtime_hours: f64,
    pub direct_hours: f64,
    pub indirect_hours: f64,
    pub loss_hours: f64,
    pub support_in_hours: f64,
    pub support_out_hours: f64,
}

impl LaborTotals {
    pub fn from_rows(rows: &RowSet) -> Self {
        let mut employees = BTreeSet::new();
        let mut present = BTreeSet::new();
        let mut totals = Self::default();
        for row in &rows.attendance {
            employees.insert(row.employee_id.as_str());
            if row.status.is_attending() {
                present.insert(row.employee_id.as_str());
                totals.regular_hours += row.regular_hours;
                totals.overtime_hours += row.overtime_hours;
            }
        }
        totals.headcount = employees.len() as i64;
        totals.present_count = present.len() as i64;
        for row in &rows.labor_inputs {
            totals.direct_hours += row.direct_hours;
            totals.indirect_hours += row.indirect_hours;
            totals.loss_hours += row.loss_hours;
            totals.support_in_hours += row.support_in_hours;
            totals.support_out_hours += row.support_out_hours;
        }
        totals
    }

    pub fn from_metrics(metrics: &ProcessMetrics) -> Self {
        Self {
            headcount: metrics.headcount.unwrap_or(0),
            present_count: metrics.present_count.unwrap_or(0),
            regular_hours: metrics.regular_hours.unwrap_or(0.0),
            overtime_hours: metrics.overtime_hours.unwrap_or(0.0),
            direct_hours: metrics.direct_hours.unwrap_or(0.0),
            indirect_hours: metrics.indirect_hours.unwrap_or(0.0),
            loss_hours: metrics.loss_hours.unwrap_or(0.0),
            support_in_hours: metrics.support_in_hours.unwrap_or(0.0),
            support_out_hours: metrics.support_out_hours.unwrap_or(0.0),
        }
    }

    pub fn add(&mut self, other: &Self) {
        self.headcount += other.headcount;
        self.present_count += other.present_count;
        self.regular_hours += other.regular_hours;
        self.overtime_hours += other.overtime_hours;
        self.direct_hours += other.direct_hours;
        self.indirect_hours += other.indirect_hours;
        self.loss_hours += other.loss_hours;
        self.support_in_hours += other.support_in_hours;
        self.support_out_hours += other.support_out_hours;
    }

    pub fn total_input_hours(&self) -> f64 {
        self.regular_hours + self.overtime_hours
    }

    pub fn net_input_hours(&self) -> f64 {
        self.direct_hours + self.support_in_hours - self.support_out_hours
    }

    /// Labor-hour input stage.
    pub fn to_metrics(&self) -> ProcessMetrics {
        let total_input = self.total_input_hours();
        ProcessMetrics {
            headcount: Some(self.headcount),
            present_count: Some(self.present_count),
            regular_hours: Some(round2(self.regular_hours)),
            overtime_hours: Some(round2(self.overtime_hours)),
            total_input_hours: Some(round2(total_input)),
            direct_hours: Some(round2(self.direct_hours)),
            indirect_hours: Some(round2(self.indirect_hours)),
            loss_hours: Some(round2(self.loss_hours)),
            support_in_hours: Some(round2(self.support_in_hours)),
            support_out_hours: Some(round2(self.support_out_hours)),
            net_input_hours: Some(round2(self.net_input_hours())),
            loss_rate: Some(percent(self.loss_hours, total_input)),
            indirect_ratio: Some(percent(
                self.indirect_hours,
                self.direct_hours + self.indirect_hours,
            )),
            hours_per_head: Some(ratio(total_input, self.present_count as f64)),
            ..Default::default()
        }
    }
}

/// Additive production and cost quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProductionTotals {
    pub lot_count: i64,
    pub completed_lot_count: i64,
    pub plan_qty: i64,
    pub input_qty: i64,
    pub completed_qty: i64,
    pub defect_qty: i64,
    pub material_cost: f64,
    pub processing_cost: f64,
    pub defect_cost: f64,
    pub earned_hours: f64,
}

impl ProductionTotals {
    pub fn from_records(records: &[PerformanceRecord]) -> Self {
        let mut totals = Self::default();
        for record in records {
            totals.lot_count += 1;
            if record.state == LotState::Completed {
                totals.completed_lot_count += 1;
            }
            totals.plan_qty = totals.plan_qty.saturating_add(record.plan_qty);
            totals.input_qty = totals.input_qty.saturating_add(record.input_qty);
            totals.completed_qty = totals.completed_qty.saturating_add(record.completed_qty);
            totals.defect_qty = totals.defect_qty.saturating_add(record.defect_qty);
            totals.material_cost += record.material_cost;
            totals.processing_cost += record.processing_cost;
            totals.defect_cost += record.defect_cost;
            totals.earned_hours += record.completed_qty as f64 * record.standard_minutes / 60.0;
        }
        totals
    }

    pub fn from_metrics(metrics: &ProcessMetrics) -> Self {
        Self {
            lot_count: metrics.lot_count.unwrap_or(0),
            completed_lot_count: metrics.completed_lot_count.unwrap_or(0),
            plan_qty: metrics.plan_qty.unwrap_or(0),
            input_qty: metrics.input_qty.unwrap_or(0),
            completed_qty: metrics.completed_qty.unwrap_or(0),
            defect_qty: metrics.defect_qty.unwrap_or(0),
            material_cost: metrics.material_cost.unwrap_or(0.0),
            processing_cost: metrics.processing_cost.unwrap_or(0.0),
            defect_cost: metrics.defect_cost.unwrap_or(0.0),
            earned_hours: metrics.earned_hours.unwrap_or(0.0),
        }
    }

    pub fn add(&mut self, other: &Self) {
        self.lot_count += other.lot_count;
        self.completed_lot_count += other.completed_lot_count;
        self.plan_qty = self.plan_qty.saturating_add(other.plan_qty);
        self.input_qty = self.input_qty.saturating_add(other.input_qty);
        self.completed_qty = self.completed_qty.saturating_add(other.completed_qty);
        self.defect_qty = self.defect_qty.saturating_add(other.defect_qty);
        self.material_cost += other.material_cost;
        self.processing_cost += other.processing_cost;
        self.defect_cost += other.defect_cost;
        self.earned_hours += other.earned_hours;
    }

    pub fn total_cost(&self) -> f64 {
        self.material_cost + self.processing_cost
    }

    /// Production cost stage.
    pub fn to_cost_metrics(&self) -> ProcessMetrics {
        let total_cost = self.total_cost();
        ProcessMetrics {
            lot_count: Some(self.lot_count),
            completed_lot_count: Some(self.completed_lot_count),
            plan_qty: Some(self.plan_qty),
            input_qty: Some(self.input_qty),
            completed_qty: Some(self.completed_qty),
            defect_qty: Some(self.defect_qty),
            wip_qty: Some(wip_qty(self.completed_qty, self.input_qty)),
            material_cost: Some(round2(self.material_cost)),
            processing_cost: Some(round2(self.processing_cost)),
            defect_cost: Some(round2(self.defect_cost)),
            total_cost: Some(round2(total_cost)),
            unit_cost: Some(ratio(total_cost, self.completed_qty as f64)),
            material_cost_ratio: Some(percent(self.material_cost, total_cost)),
            processing_cost_ratio: Some(percent(self.processing_cost, total_cost)),
            ..Default::default()
        }
    }
}

/// Efficiency stage, computed from the additive totals of the other two stages.
pub fn efficiency_metrics(labor: &LaborTotals, production: &ProductionTotals) -> ProcessMetrics {
    let total_input = labor.total_input_hours();
    ProcessMetrics {
        earned_hours: Some(round2(production.earned_hours)),
        labor_efficiency: Some(percent(production.earned_hours, labor.net_input_hours())),
        defect_rate: Some(defect_rate(production.input_qty, production.defect_qty)),
        achievement_rate: Some(achievement_rate(production.plan_qty, production.completed_qty)),
        yield_rate: Some(yield_rate(production.input_qty, production.completed_qty)),
        lot_completion_rate: Some(percent(
            production.completed_lot_count as f64,
            production.lot_count as f64,
        )),
        output_per_hour: Some(ratio(production.completed_qty as f64, total_input)),
        cost_per_hour: Some(ratio(production.total_cost(), total_input)),
        ..Default::default()
    }
}

pub fn labor_stage(rows: &RowSet) -> ProcessMetrics {
    LaborTotals::from_rows(rows).to_metrics()
}

pub fn cost_stage(records: &[PerformanceRecord]) -> ProcessMetrics {
    ProductionTotals::from_records(records).to_cost_metrics()
}

pub fn efficiency_stage(rows: &RowSet, records: &[PerformanceRecord]) -> ProcessMetrics {
    efficiency_metrics(
        &LaborTotals::from_rows(rows),
        &ProductionTotals::from_records(records),
    )
}

/// The three partial reports of one category, in merge order.
pub fn process_partials(rows: &RowSet, records: &[PerformanceRecord]) -> Vec<ProcessMetrics> {
    vec![
        labor_stage(rows),
        cost_stage(records),
        efficiency_stage(rows, records),
    ]
}

pub fn attendance_stage(rows: &[AttendanceRow]) -> AttendanceMetrics {
    let mut latest: BTreeMap<&str, AttendanceStatus> = BTreeMap::new();
    for row in rows {
        latest.insert(row.employee_id.as_str(), row.status);
    }
    let count = |status: AttendanceStatus| latest.values().filter(|s| **s == status).count() as i64;
    let total = latest.len() as i64;
    let late = count(AttendanceStatus::Late);
    let attended = count(AttendanceStatus::Present) + late;
    let absent = count(AttendanceStatus::Absent);
    AttendanceMetrics {
        total_headcount: Some(total),
        attended_count: Some(attended),
        late_count: Some(late),
        absent_count: Some(absent),
        leave_count: Some(count(AttendanceStatus::Leave)),
        attendance_rate: Some(percent(attended as f64, total as f64)),
        absence_rate: Some(percent(absent as f64, total as f64)),
    }
}

/// Partials of the cross-category report: attendance, then the process stages
/// reduced over every category report of the tick.
pub fn main_partials(attendance: &[AttendanceRow], reports: &[ProcessReport]) -> Vec<MainMetrics> {
    let mut labor = LaborTotals::default();
    let mut production = ProductionTotals::default();
    for report in reports {
        labor.add(&LaborTotals::from_metrics(&report.metrics));
        production.add(&ProductionTotals::from_metrics(&report.metrics));
    }
    vec![
        MainMetrics::from_attendance(attendance_stage(attendance)),
        MainMetrics::from_totals(labor.to_metrics()),
        MainMetrics::from_totals(production.to_cost_metrics()),
        MainMetrics::from_totals(efficiency_metrics(&labor, &production)),
    ]
}
