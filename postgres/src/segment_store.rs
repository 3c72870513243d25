//! Segment persistence and the atomic version bump.

use outreach_core::filter::{ClauseInput, ClauseList};
use outreach_core::segment::{Segment, SegmentId, SegmentVersion};
use outreach_core::store::{SegmentStore, StoreError, StoreFuture};
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed [`SegmentStore`].
#[derive(Clone)]
pub struct PgSegmentStore {
    pool: PgPool,
}

impl PgSegmentStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SegmentStore for PgSegmentStore {
    fn get(&self, segment_id: SegmentId) -> StoreFuture<'_, Segment> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, name, locale, filter_definition, version, description, created_by
                FROM segments
                WHERE id = $1
                ",
            )
            .bind(segment_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(format!("segment {segment_id}")))?;

            let definition: serde_json::Value = row.get("filter_definition");
            let inputs: Vec<ClauseInput> = serde_json::from_value(definition)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            // Re-validate on load: a Segment in hand always carries a
            // canonical clause list.
            let clauses = ClauseList::validate(&inputs)?;

            Ok(Segment {
                id: SegmentId::new(row.get::<String, _>("id")),
                name: row.get("name"),
                locale: row.get("locale"),
                clauses,
                version: SegmentVersion::new(row.get::<i64, _>("version")),
                description: row.get("description"),
                created_by: row.get("created_by"),
            })
        })
    }

    fn bump_version(&self, segment_id: SegmentId) -> StoreFuture<'_, SegmentVersion> {
        Box::pin(async move {
            // Single-statement increment: the read and write happen inside
            // one row-locked UPDATE, so concurrent bumps serialize in the
            // database and can never clobber each other.
            let row = sqlx::query(
                r"
                UPDATE segments
                SET version = version + 1, updated_at = now()
                WHERE id = $1
                RETURNING version
                ",
            )
            .bind(segment_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(format!("segment {segment_id}")))?;

            let version = SegmentVersion::new(row.get::<i64, _>("version"));
            tracing::info!(segment = %segment_id, %version, "segment version bumped");
            Ok(version)
        })
    }
}
