//! Non-working-day predicate consumed by the holiday gate.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    async fn is_holiday(&self, date: NaiveDate) -> bool;
}

/// Provider the cached calendar refreshes from.
#[async_trait]
pub trait HolidaySource: Send + Sync {
    async fn load(&self) -> Result<HolidaySet>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HolidaySet {
    #[serde(default)]
    pub weekly_off: Vec<Weekday>,
    #[serde(default)]
    pub dates: BTreeSet<NaiveDate>,
}

impl HolidaySet {
    pub fn new(weekly_off: Vec<Weekday>, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            weekly_off,
            dates: dates.into_iter().collect(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.weekly_off.contains(&date.weekday()) || self.dates.contains(&date)
    }
}

#[async_trait]
impl HolidayCalendar for HolidaySet {
    async fn is_holiday(&self, date: NaiveDate) -> bool {
        self.contains(date)
    }
}

/// `holidays.yaml` in the workspace root.
#[derive(Debug, Clone)]
pub struct YamlHolidaySource {
    path: PathBuf,
}

impl YamlHolidaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HolidaySource for YamlHolidaySource {
    async fn load(&self) -> Result<HolidaySet> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }
}

/// Keeps the last successfully loaded set; `refresh` is driven by the monthly job.
pub struct CachedHolidayCalendar {
    source: Arc<dyn HolidaySource>,
    current: RwLock<HolidaySet>,
}

impl CachedHolidayCalendar {
    pub fn new(source: Arc<dyn HolidaySource>) -> Self {
        Self {
            source,
            current: RwLock::new(HolidaySet::default()),
        }
    }

    /// On failure the previous set stays in place.
    pub async fn refresh(&self) -> Result<usize> {
        let loaded = self.source.load().await?;
        let count = loaded.dates.len();
        *self.current.write().await = loaded;
        info!(dates = count, "holiday calendar refreshed");
        Ok(count)
    }
}

#[async_trait]
impl HolidayCalendar for CachedHolidayCalendar {
    async fn is_holiday(&self, date: NaiveDate) -> bool {
        self.current.read().await.contains(date)
    }
}
