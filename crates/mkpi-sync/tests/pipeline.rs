use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use mkpi_connectors::decode::recorded_at;
use mkpi_connectors::{ConnectorError, RawRow, SourceConnector};
use mkpi_core::{Category, CategoryId, EntityType, LotState, SourceSystem, TimeWindow};
use mkpi_storage::{MemoryStore, ReportCaches, Repositories};
use mkpi_sync::{
    HolidaySet, Notifier, Orchestrator, PipelineAlert, PipelineError, ReportReader, TickOutcome,
};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

struct StaticConnector {
    source: SourceSystem,
    rows: Mutex<HashMap<EntityType, Vec<RawRow>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StaticConnector {
    fn new(source: SourceSystem) -> Arc<Self> {
        Arc::new(Self {
            source,
            rows: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn set(&self, entity: EntityType, rows: JsonValue) {
        let rows = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row.as_object().unwrap().clone())
            .collect();
        self.rows.lock().unwrap().insert(entity, rows);
    }

    fn rows(&self, entity: EntityType) -> Result<Vec<RawRow>, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectorError::Anyhow(anyhow::anyhow!(
                "{} timed out",
                self.source
            )));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&entity)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceConnector for StaticConnector {
    fn source(&self) -> SourceSystem {
        self.source
    }

    async fn pull(
        &self,
        _run_id: Uuid,
        entity: EntityType,
        window: TimeWindow,
    ) -> Result<Vec<RawRow>, ConnectorError> {
        Ok(self
            .rows(entity)?
            .into_iter()
            .filter(|row| recorded_at(row).is_some_and(|ts| window.contains(ts)))
            .collect())
    }

    async fn pull_current(
        &self,
        _run_id: Uuid,
        entity: EntityType,
    ) -> Result<Vec<RawRow>, ConnectorError> {
        self.rows(entity)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<PipelineAlert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &PipelineAlert) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    mes: Arc<StaticConnector>,
    erp: Arc<StaticConnector>,
    notifier: Arc<RecordingNotifier>,
    reader: ReportReader,
    orchestrator: Orchestrator,
}

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

fn harness_with(calendar: HolidaySet) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mes = StaticConnector::new(SourceSystem::Mes);
    let erp = StaticConnector::new(SourceSystem::Erp);

    mes.set(
        EntityType::ProductionCount,
        json!([
            {"lot_no": "L-1", "category": "ASSY", "part_code": "P-100", "plan_qty": 100,
             "input_qty": 100, "output_qty": 95, "recorded_at": "2026-03-03T09:30:00Z"},
            {"lot_no": "L-2", "category": "ASSY", "part_code": "P-100", "plan_qty": 50,
             "input_qty": 40, "output_qty": null, "recorded_at": "2026-03-03T09:40:00Z"}
        ]),
    );
    mes.set(
        EntityType::LotStatus,
        json!([
            {"lot_no": "L-1", "category": "ASSY", "part_code": "P-100", "state": "completed",
             "plan_qty": 100, "input_qty": 100, "output_qty": 95},
            {"lot_no": "L-2", "category": "ASSY", "part_code": "P-100", "state": "in_production",
             "plan_qty": 50, "input_qty": 40},
            {"lot_no": "L-3", "category": "PAINT", "part_code": "P-300", "state": "in_production",
             "plan_qty": 30, "input_qty": 30}
        ]),
    );
    mes.set(
        EntityType::Attendance,
        json!([
            {"employee_id": "E1", "category": "ASSY", "status": "present", "regular_hours": 8},
            {"employee_id": "E2", "category": "ASSY", "status": "late", "regular_hours": 7.5},
            {"employee_id": "E3", "category": "PAINT", "status": "absent"}
        ]),
    );
    mes.set(
        EntityType::LaborInput,
        json!([
            {"category": "ASSY", "direct_hours": 15, "indirect_hours": 2, "loss_hours": 1,
             "recorded_at": "2026-03-03T09:00:00Z"}
        ]),
    );
    erp.set(
        EntityType::LotResult,
        json!([
            {"lot_no": "L-1", "category": "ASSY", "input_qty": 100, "completed_qty": 95,
             "defect_qty": 5, "recorded_at": "2026-03-03T09:50:00Z"}
        ]),
    );
    erp.set(
        EntityType::CostMaster,
        json!([
            {"part_code": "P-100", "unit_material_cost": 2.0, "unit_processing_cost": 1.0,
             "standard_minutes": 6, "latest": true}
        ]),
    );

    let notifier = Arc::new(RecordingNotifier::default());
    let caches = Arc::new(ReportCaches::new());
    let reader = ReportReader::new(store.clone(), caches.clone());
    let orchestrator = Orchestrator::new(
        Repositories::from_store(store.clone()),
        vec![mes.clone() as Arc<dyn SourceConnector>, erp.clone()],
        vec![
            Category::new("ASSY", "Assembly"),
            Category::new("PAINT", "Paint"),
        ],
        FixedOffset::east_opt(0).unwrap(),
    )
    .with_calendar(Arc::new(calendar))
    .with_notifier(notifier.clone())
    .with_caches(caches);

    Harness {
        store,
        mes,
        erp,
        notifier,
        reader,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(HolidaySet::default())
}

fn completed(outcome: TickOutcome) -> mkpi_sync::TickSummary {
    match outcome {
        TickOutcome::Completed(summary) => summary,
        other => panic!("expected a completed tick, got {other:?}"),
    }
}

#[tokio::test]
async fn live_tick_mirrors_and_builds_every_report() {
    let h = harness();
    let summary = completed(h.orchestrator.run_sync_tick(at(3, 10, 0)).await.unwrap());

    assert_eq!(summary.process_reports.len(), 2);
    assert_eq!(summary.overlaps, 0);
    assert!(summary.mirrored > 0);

    let reports = h.store.process_reports().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| !r.snapshot && r.hour_slot == 10));
    assert_eq!(h.store.main_reports().await.len(), 1);

    let lot_1 = h
        .store
        .performance_records()
        .await
        .into_iter()
        .find(|r| r.lot_no == "L-1")
        .unwrap();
    assert_eq!(lot_1.defect_rate, 5.0);
    assert_eq!(lot_1.achievement_rate, 95.0);
    assert_eq!(lot_1.wip_qty, -5);
    assert_eq!(lot_1.material_cost, 200.0);

    let tracked: Vec<_> = h
        .store
        .lot_entries()
        .await
        .into_iter()
        .map(|e| e.lot_no)
        .collect();
    assert_eq!(tracked, vec!["L-2".to_string(), "L-3".to_string()]);
    assert!(h.notifier.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn second_tick_in_the_same_hour_is_a_no_op() {
    let h = harness();
    completed(h.orchestrator.run_sync_tick(at(3, 10, 0)).await.unwrap());
    let mirrored = h.store.mirrored_records().await.len();
    let calls = h.mes.calls.load(Ordering::SeqCst);

    let outcome = h.orchestrator.run_sync_tick(at(3, 10, 40)).await.unwrap();
    assert_eq!(outcome, TickOutcome::SkippedSameHour);
    assert_eq!(h.mes.calls.load(Ordering::SeqCst), calls);
    assert_eq!(h.store.mirrored_records().await.len(), mirrored);

    let assy = CategoryId::new("ASSY");
    let live_assy_hour_10 = h
        .store
        .process_reports()
        .await
        .into_iter()
        .filter(|r| r.category == assy && !r.snapshot && r.hour_slot == 10)
        .count();
    assert_eq!(live_assy_hour_10, 1);

    completed(h.orchestrator.run_sync_tick(at(3, 11, 0)).await.unwrap());
    assert_eq!(h.store.process_reports().await.len(), 4);
}

#[tokio::test]
async fn incremental_pull_does_not_double_count_the_day() {
    let h = harness();
    completed(h.orchestrator.run_sync_tick(at(3, 10, 0)).await.unwrap());
    completed(h.orchestrator.run_sync_tick(at(3, 11, 0)).await.unwrap());

    let assy = CategoryId::new("ASSY");
    let latest = h
        .reader
        .latest_process(&assy, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.hour_slot, 11);
    assert_eq!(latest.metrics.input_qty, Some(140));
    assert_eq!(latest.metrics.direct_hours, Some(15.0));
}

#[tokio::test]
async fn holiday_performs_no_calls_and_no_writes() {
    let h = harness_with(HolidaySet::new(vec![], [date(3)]));
    let outcome = h.orchestrator.run_sync_tick(at(3, 10, 0)).await.unwrap();

    assert_eq!(outcome, TickOutcome::SkippedHoliday);
    assert_eq!(h.mes.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.erp.calls.load(Ordering::SeqCst), 0);
    assert!(h.store.mirrored_records().await.is_empty());
    assert!(h.store.process_reports().await.is_empty());
    assert!(h.store.main_reports().await.is_empty());
}

#[tokio::test]
async fn failing_source_still_mirrors_the_other_and_notifies() {
    let h = harness();
    h.erp.failing.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .run_sync_tick(at(3, 10, 0))
        .await
        .unwrap_err();
    match &err {
        PipelineError::SourceUnavailable(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].source_system, SourceSystem::Erp);
        }
        other => panic!("unexpected error {other:?}"),
    }

    let mirrored = h.store.mirrored_records().await;
    assert!(!mirrored.is_empty());
    assert!(mirrored.iter().all(|r| r.source == SourceSystem::Mes));
    assert!(h.store.process_reports().await.is_empty());
    assert!(h.store.main_reports().await.is_empty());
    assert!(h.store.performance_records().await.is_empty());

    let alerts = h.notifier.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].message.contains("erp"));
}

#[tokio::test]
async fn snapshot_tick_backfills_completed_lots_and_tags_everything() {
    let h = harness();
    completed(h.orchestrator.run_sync_tick(at(3, 10, 0)).await.unwrap());

    h.mes.set(
        EntityType::LotStatus,
        json!([
            {"lot_no": "L-1", "category": "ASSY", "part_code": "P-100", "state": "completed",
             "plan_qty": 100, "input_qty": 100, "output_qty": 95},
            {"lot_no": "L-2", "category": "ASSY", "part_code": "P-100", "state": "completed",
             "plan_qty": 50, "input_qty": 40},
            {"lot_no": "L-3", "category": "PAINT", "part_code": "P-300", "state": "in_production",
             "plan_qty": 30, "input_qty": 30}
        ]),
    );
    let summary = completed(h.orchestrator.run_snapshot_tick(at(3, 23, 55)).await.unwrap());
    assert_eq!(summary.process_reports.len(), 2);

    let snapshot_reports: Vec<_> = h
        .store
        .process_reports()
        .await
        .into_iter()
        .filter(|r| r.snapshot)
        .collect();
    assert_eq!(snapshot_reports.len(), 2);
    assert!(snapshot_reports.iter().all(|r| r.business_date == date(3)));
    assert_eq!(
        h.store
            .main_reports()
            .await
            .iter()
            .filter(|r| r.snapshot)
            .count(),
        1
    );
    assert!(h
        .store
        .mirrored_records()
        .await
        .iter()
        .any(|r| r.snapshot && r.captured_at == at(3, 23, 55)));

    let lot_2 = h
        .store
        .performance_records()
        .await
        .into_iter()
        .find(|r| r.snapshot && r.lot_no == "L-2")
        .unwrap();
    assert_eq!(lot_2.state, LotState::Completed);
    assert_eq!(lot_2.completed_qty, 50);

    let tracked: Vec<_> = h
        .store
        .lot_entries()
        .await
        .into_iter()
        .map(|e| e.lot_no)
        .collect();
    assert_eq!(tracked, vec!["L-3".to_string()]);
}

#[tokio::test]
async fn repeated_snapshot_for_the_day_is_skipped() {
    let h = harness();
    completed(h.orchestrator.run_snapshot_tick(at(3, 23, 55)).await.unwrap());
    let outcome = h.orchestrator.run_snapshot_tick(at(3, 23, 58)).await.unwrap();
    assert_eq!(outcome, TickOutcome::SkippedSnapshotExists);
    assert_eq!(h.store.main_reports().await.len(), 1);
}

#[tokio::test]
async fn snapshot_failure_is_not_notified() {
    let h = harness();
    h.mes.failing.store(true, Ordering::SeqCst);
    assert!(h
        .orchestrator
        .run_snapshot_tick(at(3, 23, 55))
        .await
        .is_err());
    assert!(h.notifier.alerts.lock().unwrap().is_empty());
    assert!(h.store.main_reports().await.is_empty());
}

#[tokio::test]
async fn next_day_ticks_leave_snapshots_untouched() {
    let h = harness();
    completed(h.orchestrator.run_sync_tick(at(3, 10, 0)).await.unwrap());
    completed(h.orchestrator.run_snapshot_tick(at(3, 23, 55)).await.unwrap());

    let snapshots = |reports: Vec<mkpi_core::ProcessReport>| -> Vec<_> {
        reports
            .into_iter()
            .filter(|r| r.snapshot && r.captured_at.date_naive() == date(3))
            .collect()
    };
    let before = snapshots(h.store.process_reports().await);
    let main_before: Vec<_> = h
        .store
        .main_reports()
        .await
        .into_iter()
        .filter(|r| r.snapshot)
        .collect();

    completed(h.orchestrator.run_sync_tick(at(4, 10, 0)).await.unwrap());

    assert_eq!(snapshots(h.store.process_reports().await), before);
    let main_after: Vec<_> = h
        .store
        .main_reports()
        .await
        .into_iter()
        .filter(|r| r.snapshot)
        .collect();
    assert_eq!(main_after, main_before);
}

#[tokio::test]
async fn reads_see_new_reports_after_each_tick() {
    let h = harness();
    let assy = CategoryId::new("ASSY");
    completed(h.orchestrator.run_sync_tick(at(3, 10, 0)).await.unwrap());

    let first = h.reader.latest_process(&assy, false).await.unwrap().unwrap();
    let first_main = h.reader.latest_main(false).await.unwrap().unwrap();
    assert_eq!(first.hour_slot, 10);

    completed(h.orchestrator.run_sync_tick(at(3, 11, 0)).await.unwrap());

    let second = h.reader.latest_process(&assy, false).await.unwrap().unwrap();
    let second_main = h.reader.latest_main(false).await.unwrap().unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.hour_slot, 11);
    assert_ne!(second_main.id, first_main.id);
}
