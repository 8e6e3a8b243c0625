//! Connector backed by JSON files on disk: `<root>/<source>/<entity>.json`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use mkpi_core::{EntityType, SourceSystem, TimeWindow};
use tracing::debug;
use uuid::Uuid;

use crate::decode::recorded_at;
use crate::{ensure_served, rows_from_json, ConnectorError, RawRow, SourceConnector};

#[derive(Debug, Clone)]
pub struct FixtureSourceConnector {
    source: SourceSystem,
    root: PathBuf,
}

impl FixtureSourceConnector {
    pub fn new(source: SourceSystem, root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            root: root.into(),
        }
    }

    pub fn entity_path(&self, entity: EntityType) -> PathBuf {
        self.root
            .join(self.source.as_str())
            .join(format!("{}.json", entity.as_str()))
    }

    async fn load(&self, entity: EntityType) -> Result<Vec<RawRow>, ConnectorError> {
        ensure_served(self.source, entity)?;
        let path = self.entity_path(entity);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no fixture file; source returned nothing");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("reading {}", path.display()))
                    .into())
            }
        };
        let value: serde_json::Value =
            serde_json::from_str(&text).with_context(|| parse_context(&path))?;
        rows_from_json(self.source, entity, value)
    }
}

fn parse_context(path: &Path) -> String {
    format!("parsing {}", path.display())
}

#[async_trait]
impl SourceConnector for FixtureSourceConnector {
    fn source(&self) -> SourceSystem {
        self.source
    }

    /// Rows without a parseable `recorded_at` only appear in current-state pulls.
    async fn pull(
        &self,
        run_id: Uuid,
        entity: EntityType,
        window: TimeWindow,
    ) -> Result<Vec<RawRow>, ConnectorError> {
        let rows = self.load(entity).await?;
        let total = rows.len();
        let rows: Vec<RawRow> = rows
            .into_iter()
            .filter(|row| recorded_at(row).is_some_and(|ts| window.contains(ts)))
            .collect();
        debug!(%run_id, %entity, total, kept = rows.len(), "fixture pull");
        Ok(rows)
    }

    async fn pull_current(
        &self,
        run_id: Uuid,
        entity: EntityType,
    ) -> Result<Vec<RawRow>, ConnectorError> {
        let rows = self.load(entity).await?;
        debug!(%run_id, %entity, rows = rows.len(), "fixture pull_current");
        Ok(rows)
    }
}
