//! `sources.yaml`: which source systems are enabled, how to reach them, and the
//! categories reported on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mkpi_core::{Category, SourceSystem};
use mkpi_storage::HttpFetcher;
use serde::Deserialize;

use crate::{FixtureSourceConnector, HttpSourceConnector, SourceConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorMode {
    Fixture,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: SourceSystem,
    pub display_name: String,
    pub enabled: bool,
    pub mode: ConnectorMode,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Relative to the workspace root.
    #[serde(default)]
    pub fixture_dir: Option<PathBuf>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
    pub categories: Vec<Category>,
}

impl SourceRegistry {
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("sources.yaml");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text)?;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        for system in [SourceSystem::Mes, SourceSystem::Erp] {
            let count = self.sources.iter().filter(|s| s.source_id == system).count();
            if count != 1 {
                bail!("expected exactly one `{system}` source, found {count}");
            }
        }
        if self.categories.is_empty() {
            bail!("no categories configured");
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Connectors for every enabled source.
    pub fn connectors(
        &self,
        workspace_root: &Path,
        http: &HttpFetcher,
    ) -> Result<Vec<Arc<dyn SourceConnector>>> {
        self.enabled_sources()
            .map(|source| connector_for_source(source, workspace_root, http))
            .collect()
    }
}

pub fn connector_for_source(
    source: &SourceConfig,
    workspace_root: &Path,
    http: &HttpFetcher,
) -> Result<Arc<dyn SourceConnector>> {
    match source.mode {
        ConnectorMode::Fixture => {
            let dir = source
                .fixture_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("fixtures"));
            Ok(Arc::new(FixtureSourceConnector::new(
                source.source_id,
                workspace_root.join(dir),
            )))
        }
        ConnectorMode::Http => {
            let base_url = source
                .base_url
                .as_deref()
                .with_context(|| format!("http source {} has no base_url", source.source_id))?;
            Ok(Arc::new(HttpSourceConnector::new(
                source.source_id,
                base_url,
                http.clone(),
            )))
        }
    }
}
