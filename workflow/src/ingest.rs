//! Idempotent ingestion of provider events.
//!
//! One entry point, [`IngestPipeline::ingest`], turns a normalized event
//! input into a canonical stored row. Dedup is not an application-level
//! existence check: the storage layer's insert-or-ignore on
//! `(provider, provider_event_id)` decides, which closes the window where
//! two concurrent ingests of the same event could both pass a read check.
//!
//! The two designed no-ops — a dedup hit and a dry run — are reported in
//! the outcome rather than raised as errors.

use outreach_core::event::{ProviderEvent, ReplyLabel, idempotency_key};
use outreach_core::store::{ProviderEventStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Errors from event ingestion.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A required field is absent or empty.
    #[error("Event payload is missing required field {field}")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// Underlying storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Stable error code for callers that dispatch on codes.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "ERR_EVENT_FIELD",
            Self::Store(_) => "ERR_STORE",
        }
    }
}

/// Normalized event fields as handed to ingestion.
///
/// This is the canonical event minus the derived fields (idempotency key,
/// reply label), which ingestion computes itself so they cannot drift from
/// the stored row.
#[derive(Clone, Debug)]
pub struct EventInput {
    /// Provider slug. Required.
    pub provider: String,
    /// Provider-assigned (or deterministically derived) event id.
    pub provider_event_id: Option<String>,
    /// Event type. Required.
    pub event_type: String,
    /// Provider outcome classification.
    pub outcome: Option<String>,
    /// Local contact reference.
    pub contact_id: Option<String>,
    /// Local outbound message reference.
    pub outbound_id: Option<String>,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Verbatim raw payload.
    pub payload: serde_json::Value,
}

impl From<ProviderEvent> for EventInput {
    fn from(event: ProviderEvent) -> Self {
        Self {
            provider: event.provider,
            provider_event_id: event.provider_event_id,
            event_type: event.event_type,
            outcome: event.outcome,
            contact_id: event.contact_id,
            outbound_id: event.outbound_id,
            occurred_at: event.occurred_at,
            payload: event.payload,
        }
    }
}

/// Per-call ingestion options.
#[derive(Clone, Copy, Debug, Default)]
pub struct IngestOptions {
    /// Validate-and-return without any read or write.
    pub dry_run: bool,
}

/// Result of one ingestion attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// 1 when a row was written, 0 otherwise.
    pub inserted: usize,
    /// True when an existing row with the same dedup key was found.
    pub deduped: bool,
    /// True when the call short-circuited before any read or write.
    pub dry_run: bool,
}

/// The event ingestion pipeline.
pub struct IngestPipeline {
    events: Arc<dyn ProviderEventStore>,
}

impl IngestPipeline {
    /// Wire a pipeline over the given event store.
    #[must_use]
    pub fn new(events: Arc<dyn ProviderEventStore>) -> Self {
        Self { events }
    }

    /// Ingest one event.
    ///
    /// Duplicate ingestion attempts with the same `(provider,
    /// provider_event_id)` are no-ops reporting `deduped: true`. Events
    /// without a provider event id receive a random idempotency key and are
    /// always inserted — accepted only for truly anonymous events, since
    /// such a key is not reproducible across retries.
    ///
    /// # Errors
    ///
    /// - [`IngestError::MissingField`] when `provider` or `event_type` is
    ///   absent or empty
    /// - [`IngestError::Store`] for storage failures
    pub async fn ingest(
        &self,
        input: EventInput,
        opts: IngestOptions,
    ) -> Result<IngestOutcome, IngestError> {
        if opts.dry_run {
            tracing::debug!(provider = %input.provider, "dry run: skipping event ingest");
            return Ok(IngestOutcome {
                inserted: 0,
                deduped: false,
                dry_run: true,
            });
        }

        if input.provider.is_empty() {
            return Err(IngestError::MissingField { field: "provider" });
        }
        if input.event_type.is_empty() {
            return Err(IngestError::MissingField { field: "event_type" });
        }

        let event_ref = input
            .provider_event_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = idempotency_key(&input.provider, &event_ref);
        let reply_label = ReplyLabel::classify(&input.event_type, input.outcome.as_deref());

        let event = ProviderEvent {
            provider: input.provider,
            provider_event_id: input.provider_event_id,
            event_type: input.event_type,
            outcome: input.outcome,
            contact_id: input.contact_id,
            outbound_id: input.outbound_id,
            occurred_at: input.occurred_at,
            payload: input.payload,
            idempotency_key: key,
            reply_label,
        };

        let provider = event.provider.clone();
        let provider_event_id = event.provider_event_id.clone();

        if self.events.insert_if_absent(event).await? {
            metrics::counter!("ingest.inserted").increment(1);
            Ok(IngestOutcome {
                inserted: 1,
                deduped: false,
                dry_run: false,
            })
        } else {
            tracing::debug!(
                provider = %provider,
                provider_event_id = provider_event_id.as_deref().unwrap_or_default(),
                "duplicate event ignored"
            );
            metrics::counter!("ingest.deduped").increment(1);
            Ok(IngestOutcome {
                inserted: 0,
                deduped: true,
                dry_run: false,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use outreach_testing::stores::InMemoryProviderEventStore;
    use serde_json::json;

    fn input(id: Option<&str>) -> EventInput {
        EventInput {
            provider: "smartlead".to_string(),
            provider_event_id: id.map(str::to_string),
            event_type: "reply".to_string(),
            outcome: Some("meeting".to_string()),
            contact_id: Some("lead-1".to_string()),
            outbound_id: Some("msg-1".to_string()),
            occurred_at: Utc::now(),
            payload: json!({"id": id}),
        }
    }

    fn pipeline() -> (Arc<InMemoryProviderEventStore>, IngestPipeline) {
        let store = Arc::new(InMemoryProviderEventStore::new());
        let pipeline = IngestPipeline::new(store.clone());
        (store, pipeline)
    }

    #[tokio::test]
    async fn ingest_then_dedup() {
        let (store, pipeline) = pipeline();

        let first = pipeline
            .ingest(input(Some("evt-1")), IngestOptions::default())
            .await
            .unwrap();
        assert_eq!(first.inserted, 1);
        assert!(!first.deduped);

        let second = pipeline
            .ingest(input(Some("evt-1")), IngestOptions::default())
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert!(second.deduped);

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn missing_provider_or_type_rejected() {
        let (_, pipeline) = pipeline();

        let mut no_provider = input(Some("evt-1"));
        no_provider.provider = String::new();
        let err = pipeline
            .ingest(no_provider, IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingField { field: "provider" }));

        let mut no_type = input(Some("evt-1"));
        no_type.event_type = String::new();
        let err = pipeline
            .ingest(no_type, IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingField { field: "event_type" }));
        assert_eq!(err.code(), "ERR_EVENT_FIELD");
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let (store, pipeline) = pipeline();
        let outcome = pipeline
            .ingest(input(Some("evt-1")), IngestOptions { dry_run: true })
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 0);
        assert!(outcome.dry_run);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn anonymous_events_always_insert() {
        let (store, pipeline) = pipeline();

        let a = pipeline.ingest(input(None), IngestOptions::default()).await.unwrap();
        let b = pipeline.ingest(input(None), IngestOptions::default()).await.unwrap();
        assert_eq!(a.inserted, 1);
        assert_eq!(b.inserted, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn stored_event_carries_derived_fields() {
        let (store, pipeline) = pipeline();
        pipeline
            .ingest(input(Some("evt-9")), IngestOptions::default())
            .await
            .unwrap();

        let stored = store
            .find_by_provider_id("smartlead".to_string(), "evt-9".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.reply_label, Some(ReplyLabel::Replied));
        assert_eq!(
            stored.idempotency_key,
            idempotency_key("smartlead", "evt-9")
        );
    }

    #[tokio::test]
    async fn normalized_client_event_round_trips_through_from() {
        let (_, pipeline) = pipeline();
        let canonical = ProviderEvent {
            provider: "smartlead".to_string(),
            provider_event_id: Some("evt-2".to_string()),
            event_type: "open".to_string(),
            outcome: None,
            contact_id: None,
            outbound_id: None,
            occurred_at: Utc::now(),
            payload: json!({}),
            idempotency_key: idempotency_key("smartlead", "evt-2"),
            reply_label: None,
        };

        let outcome = pipeline
            .ingest(EventInput::from(canonical), IngestOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
    }
}
