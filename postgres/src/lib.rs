//! `PostgreSQL` storage implementations for Outreach.
//!
//! Production implementations of the `outreach-core` storage traits, built
//! on sqlx with runtime-bound queries (no compile-time database required):
//!
//! - [`PgSegmentStore`]: segments plus the atomic in-database version bump
//! - [`PgSnapshotStore`]: transactional, all-or-nothing snapshot replace
//! - [`PgMemberSource`]: the parameterized clause-to-SQL predicate builder
//!   over the joined contacts/companies families
//! - [`PgProviderEventStore`]: insert-or-ignore canonical event persistence
//! - [`PgJobStore`]: job rows with monotonic status transitions
//!
//! # Example
//!
//! ```ignore
//! use outreach_postgres::{connect, migrate, PgSnapshotStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/outreach").await?;
//!     migrate(&pool).await?;
//!     let snapshots = PgSnapshotStore::new(pool);
//!     Ok(())
//! }
//! ```

use outreach_core::store::StoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};

mod event_store;
mod job_store;
mod member_source;
mod segment_store;
mod snapshot_store;

pub use event_store::PgProviderEventStore;
pub use job_store::PgJobStore;
pub use member_source::PgMemberSource;
pub use segment_store::PgSegmentStore;
pub use snapshot_store::PgSnapshotStore;

/// Connect a pool with sensible defaults.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the connection fails.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))
}

/// Run the embedded migrations.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
    Ok(())
}
