use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use mkpi_connectors::SourceRegistry;
use mkpi_core::CategoryId;
use mkpi_storage::{HttpClientConfig, HttpFetcher, MemoryStore, Repositories};
use mkpi_sync::{
    utc_offset_from_hours, CachedHolidayCalendar, HolidayCalendar, Orchestrator, TickOutcome,
    YamlHolidaySource,
};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

async fn fixture_orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
    let root = workspace_root();
    let registry = SourceRegistry::load(&root).unwrap();
    let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
    let connectors = registry.connectors(&root, &http).unwrap();

    let holidays = Arc::new(CachedHolidayCalendar::new(Arc::new(YamlHolidaySource::new(
        root.join("holidays.yaml"),
    ))));
    holidays.refresh().await.unwrap();

    Orchestrator::new(
        Repositories::from_store(store),
        connectors,
        registry.categories,
        utc_offset_from_hours(0),
    )
    .with_calendar(holidays)
}

#[tokio::test]
async fn workspace_holidays_include_weekends() {
    let root = workspace_root();
    let calendar = CachedHolidayCalendar::new(Arc::new(YamlHolidaySource::new(
        root.join("holidays.yaml"),
    )));
    calendar.refresh().await.unwrap();
    assert!(calendar.is_holiday(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()).await);
    assert!(calendar.is_holiday(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()).await);
    assert!(!calendar.is_holiday(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()).await);
}

#[tokio::test]
async fn fixture_sources_feed_a_live_tick() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = fixture_orchestrator(store.clone()).await;

    let outcome = orchestrator
        .run_sync_tick(Utc.with_ymd_and_hms(2026, 3, 3, 13, 0, 0).unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, TickOutcome::Completed(_)));

    let reports = store.process_reports().await;
    assert_eq!(reports.len(), 3);
    let assy = reports
        .iter()
        .find(|r| r.category == CategoryId::new("ASSY"))
        .unwrap();
    assert_eq!(assy.metrics.input_qty, Some(200));
    assert_eq!(assy.metrics.completed_qty, Some(114));
    assert_eq!(assy.metrics.defect_qty, Some(6));
    assert_eq!(assy.metrics.lot_count, Some(3));
    assert_eq!(assy.metrics.headcount, Some(3));

    let main = &store.main_reports().await[0];
    assert_eq!(main.metrics.attendance.total_headcount, Some(7));
    assert_eq!(main.metrics.attendance.absent_count, Some(1));
}

#[tokio::test]
async fn fixture_sources_on_a_weekend_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = fixture_orchestrator(store.clone()).await;

    let outcome = orchestrator
        .run_sync_tick(Utc.with_ymd_and_hms(2026, 3, 7, 10, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, TickOutcome::SkippedHoliday);
    assert!(store.mirrored_records().await.is_empty());
}
