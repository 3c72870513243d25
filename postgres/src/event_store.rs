//! Canonical provider event persistence with storage-level dedup.

use outreach_core::event::{ProviderEvent, ReplyLabel};
use outreach_core::store::{ProviderEventStore, StoreError, StoreFuture};
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed [`ProviderEventStore`].
///
/// Dedup rides on the partial unique index over
/// `(provider, provider_event_id)`: the insert is `ON CONFLICT DO NOTHING`,
/// so two concurrent ingests of the same event resolve in the database, not
/// in application code.
#[derive(Clone)]
pub struct PgProviderEventStore {
    pool: PgPool,
}

impl PgProviderEventStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> ProviderEvent {
        let reply_label: Option<String> = row.get("reply_label");
        ProviderEvent {
            provider: row.get("provider"),
            provider_event_id: row.get("provider_event_id"),
            event_type: row.get("event_type"),
            outcome: row.get("outcome"),
            contact_id: row.get("contact_id"),
            outbound_id: row.get("outbound_id"),
            occurred_at: row.get("occurred_at"),
            payload: row.get("payload"),
            idempotency_key: row.get("idempotency_key"),
            reply_label: reply_label.as_deref().and_then(ReplyLabel::parse),
        }
    }
}

impl ProviderEventStore for PgProviderEventStore {
    fn insert_if_absent(&self, event: ProviderEvent) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO provider_events
                    (provider, provider_event_id, event_type, outcome, contact_id,
                     outbound_id, occurred_at, payload, idempotency_key, reply_label)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (provider, provider_event_id)
                    WHERE provider_event_id IS NOT NULL
                    DO NOTHING
                ",
            )
            .bind(&event.provider)
            .bind(&event.provider_event_id)
            .bind(&event.event_type)
            .bind(&event.outcome)
            .bind(&event.contact_id)
            .bind(&event.outbound_id)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .bind(&event.idempotency_key)
            .bind(event.reply_label.map(ReplyLabel::as_str))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            let inserted = result.rows_affected() > 0;
            if !inserted {
                tracing::debug!(
                    provider = %event.provider,
                    provider_event_id = event.provider_event_id.as_deref().unwrap_or_default(),
                    "duplicate provider event skipped by constraint"
                );
            }
            Ok(inserted)
        })
    }

    fn find_by_provider_id(
        &self,
        provider: String,
        provider_event_id: String,
    ) -> StoreFuture<'_, Option<ProviderEvent>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT provider, provider_event_id, event_type, outcome, contact_id,
                       outbound_id, occurred_at, payload, idempotency_key, reply_label
                FROM provider_events
                WHERE provider = $1 AND provider_event_id = $2
                ",
            )
            .bind(&provider)
            .bind(&provider_event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            Ok(row.as_ref().map(Self::row_to_event))
        })
    }
}
