//! Transactional snapshot membership storage.

use outreach_core::segment::{CapturedAttributes, SegmentId, SegmentVersion, SnapshotMember};
use outreach_core::store::{SnapshotStore, StoreError, StoreFuture};
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed [`SnapshotStore`].
///
/// Replacement runs delete + inserts inside one transaction, so a reader
/// sees either the previous set or the new set for a `(segment, version)`
/// key — never a partial one. A failed insert rolls the whole replacement
/// back, which reads as "previous set still present"; the workflow layer
/// treats a zero count as needs-refresh, so a half-failed refresh cannot
/// masquerade as a validated snapshot.
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SnapshotStore for PgSnapshotStore {
    fn replace(
        &self,
        segment_id: SegmentId,
        version: SegmentVersion,
        members: Vec<SnapshotMember>,
    ) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

            sqlx::query(
                r"
                DELETE FROM segment_snapshot_members
                WHERE segment_id = $1 AND segment_version = $2
                ",
            )
            .bind(segment_id.as_str())
            .bind(version.value())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            let inserted = members.len();
            for member in members {
                let captured = serde_json::to_value(&member.captured)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                sqlx::query(
                    r"
                    INSERT INTO segment_snapshot_members
                        (segment_id, segment_version, contact_id, company_id, captured)
                    VALUES ($1, $2, $3, $4, $5)
                    ",
                )
                .bind(segment_id.as_str())
                .bind(version.value())
                .bind(&member.contact_id)
                .bind(&member.company_id)
                .bind(captured)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            }

            tx.commit()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

            tracing::info!(segment = %segment_id, %version, inserted, "snapshot rows replaced");
            metrics::counter!("snapshot.rows.inserted").increment(inserted as u64);
            Ok(inserted)
        })
    }

    fn count(&self, segment_id: SegmentId, version: SegmentVersion) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*)
                FROM segment_snapshot_members
                WHERE segment_id = $1 AND segment_version = $2
                ",
            )
            .bind(segment_id.as_str())
            .bind(version.value())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            Ok(usize::try_from(count).unwrap_or(0))
        })
    }

    fn members(
        &self,
        segment_id: SegmentId,
        version: SegmentVersion,
    ) -> StoreFuture<'_, Vec<SnapshotMember>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT segment_id, segment_version, contact_id, company_id, captured
                FROM segment_snapshot_members
                WHERE segment_id = $1 AND segment_version = $2
                ORDER BY contact_id
                ",
            )
            .bind(segment_id.as_str())
            .bind(version.value())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            rows.iter()
                .map(|row| {
                    let captured: CapturedAttributes =
                        serde_json::from_value(row.get("captured"))
                            .map_err(|e| StoreError::Serialization(e.to_string()))?;
                    Ok(SnapshotMember {
                        segment_id: SegmentId::new(row.get::<String, _>("segment_id")),
                        segment_version: SegmentVersion::new(row.get::<i64, _>("segment_version")),
                        contact_id: row.get("contact_id"),
                        company_id: row.get("company_id"),
                        captured,
                    })
                })
                .collect()
        })
    }
}
