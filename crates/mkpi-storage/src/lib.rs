//! Repositories, report cache and HTTP fetch utilities for the KPI pipeline.

pub mod cache;
pub mod http;
pub mod memory;
pub mod postgres;
pub mod repo;

use thiserror::Error;

pub use cache::{
    CachePolicy, CacheTier, MainCacheKey, ProcessCacheKey, ReportCaches, TieredCache,
};
pub use http::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repo::{
    CaptureFilter, DateRange, LotTrackingRepository, MirrorQuery, MirrorRepository,
    PerformanceRepository, ReportRepository, Repositories,
};

pub const CRATE_NAME: &str = "mkpi-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("corrupt row in {table}: {message}")]
    Corrupt {
        table: &'static str,
        message: String,
    },
}
