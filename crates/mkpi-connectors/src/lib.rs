//! Source connector contracts plus fixture and HTTP connector implementations.

pub mod decode;
pub mod fixture;
pub mod http;
pub mod registry;

use async_trait::async_trait;
use mkpi_core::{EntityType, SourceSystem, TimeWindow};
use mkpi_storage::FetchError;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

pub use decode::{decode_row, decode_rows};
pub use fixture::FixtureSourceConnector;
pub use http::HttpSourceConnector;
pub use registry::{connector_for_source, ConnectorMode, SourceConfig, SourceRegistry};

pub const CRATE_NAME: &str = "mkpi-connectors";

/// One untyped row as returned by a source system.
pub type RawRow = Map<String, JsonValue>;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("{source_system} does not serve {entity}")]
    UnsupportedEntity {
        source_system: SourceSystem,
        entity: EntityType,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected response shape from {source_system}/{entity}: {message}")]
    Shape {
        source_system: SourceSystem,
        entity: EntityType,
        message: String,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Stateless query surface of one external system.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source(&self) -> SourceSystem;

    /// Rows recorded inside `window`.
    async fn pull(
        &self,
        run_id: Uuid,
        entity: EntityType,
        window: TimeWindow,
    ) -> Result<Vec<RawRow>, ConnectorError>;

    /// The full current state of `entity`.
    async fn pull_current(
        &self,
        run_id: Uuid,
        entity: EntityType,
    ) -> Result<Vec<RawRow>, ConnectorError>;
}

pub(crate) fn ensure_served(source: SourceSystem, entity: EntityType) -> Result<(), ConnectorError> {
    if entity.source_system() == source {
        Ok(())
    } else {
        Err(ConnectorError::UnsupportedEntity {
            source_system: source,
            entity,
        })
    }
}

/// Accepts a bare array or an object wrapping the array under `rows`.
pub(crate) fn rows_from_json(
    source: SourceSystem,
    entity: EntityType,
    value: JsonValue,
) -> Result<Vec<RawRow>, ConnectorError> {
    let items = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut obj) => match obj.remove("rows") {
            Some(JsonValue::Array(items)) => items,
            _ => {
                return Err(ConnectorError::Shape {
                    source_system: source,
                    entity,
                    message: "object without a `rows` array".to_string(),
                })
            }
        },
        other => {
            return Err(ConnectorError::Shape {
                source_system: source,
                entity,
                message: format!("expected array, got {other}"),
            })
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            JsonValue::Object(row) => Some(row),
            _ => None,
        })
        .collect())
}
