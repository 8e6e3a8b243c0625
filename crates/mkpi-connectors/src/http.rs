//! Connector for a source system exposing `GET {base_url}/{entity}` JSON endpoints.

use async_trait::async_trait;
use chrono::SecondsFormat;
use mkpi_core::{EntityType, SourceSystem, TimeWindow};
use mkpi_storage::HttpFetcher;
use uuid::Uuid;

use crate::{ensure_served, rows_from_json, ConnectorError, RawRow, SourceConnector};

#[derive(Debug, Clone)]
pub struct HttpSourceConnector {
    source: SourceSystem,
    base_url: String,
    http: HttpFetcher,
}

impl HttpSourceConnector {
    pub fn new(source: SourceSystem, base_url: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            source,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn entity_url(&self, entity: EntityType) -> String {
        format!("{}/{}", self.base_url, entity.as_str())
    }

    async fn fetch(
        &self,
        run_id: Uuid,
        entity: EntityType,
        query: &[(&str, String)],
    ) -> Result<Vec<RawRow>, ConnectorError> {
        ensure_served(self.source, entity)?;
        let url = self.entity_url(entity);
        let body = self
            .http
            .get_json(run_id, self.source.as_str(), &url, query)
            .await?;
        rows_from_json(self.source, entity, body)
    }
}

fn window_query(window: &TimeWindow) -> Vec<(&'static str, String)> {
    vec![
        ("from", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("to", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
    ]
}

#[async_trait]
impl SourceConnector for HttpSourceConnector {
    fn source(&self) -> SourceSystem {
        self.source
    }

    async fn pull(
        &self,
        run_id: Uuid,
        entity: EntityType,
        window: TimeWindow,
    ) -> Result<Vec<RawRow>, ConnectorError> {
        self.fetch(run_id, entity, &window_query(&window)).await
    }

    async fn pull_current(
        &self,
        run_id: Uuid,
        entity: EntityType,
    ) -> Result<Vec<RawRow>, ConnectorError> {
        self.fetch(run_id, entity, &[]).await
    }
}
