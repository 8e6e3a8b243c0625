//! Failure alerts raised by live ticks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mkpi_core::TickKind;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

/// Pipeline-level failure of one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineAlert {
    pub run_id: Uuid,
    pub kind: TickKind,
    pub captured_at: DateTime<Utc>,
    pub message: String,
}

/// Delivery mechanics live outside the pipeline.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &PipelineAlert) -> anyhow::Result<()>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &PipelineAlert) -> anyhow::Result<()> {
        error!(
            run_id = %alert.run_id,
            kind = ?alert.kind,
            captured_at = %alert.captured_at,
            "pipeline alert: {}",
            alert.message
        );
        Ok(())
    }
}
