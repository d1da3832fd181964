//! Postgres backends for `studyforge` (companion crate).
//!
//! Bring your own `PgPool` (or use [`connect`]), run [`migrate`] once, then hand the
//! backends to the orchestrator and services:
//!
//! ```ignore
//! let pool = studyforge_postgres::connect(&url, 10).await?;
//! studyforge_postgres::migrate(&pool).await?;
//! let ledger = PgLedger::new(pool.clone(), 400);
//! let store = PgArtifactStore::new(pool.clone());
//! ```
//!
//! Every balance change is a single conditional `UPDATE`, and artifact inserts run in
//! a transaction holding a per-collection advisory lock, so concurrent requests never
//! overspend credits or grow a collection past its cap.

use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

mod artifacts;
mod consent;
mod ledger;
pub mod queries;
mod request_log;

pub use artifacts::PgArtifactStore;
pub use consent::PgConsentStore;
pub use ledger::PgLedger;
pub use request_log::PgRequestLog;
pub use sqlx::PgPool;

/// A stored value that does not map back onto a domain type.
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("unexpected value {value:?} in column {column}")]
    UnknownValue { column: &'static str, value: String },
    #[error("value {value} in column {column} is out of range")]
    OutOfRange { column: &'static str, value: i64 },
}

pub(crate) fn to_u32(column: &'static str, value: i64) -> Result<u32, RowError> {
    u32::try_from(value).map_err(|_| RowError::OutOfRange { column, value })
}

/// Open a pool with bounded acquire wait.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Apply the bundled migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
