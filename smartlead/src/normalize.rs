//! Normalization of raw Smartlead events into the canonical shape.
//!
//! Every raw event — pulled or webhook-pushed — goes through
//! [`normalize_event`] before storage. Two rules matter here:
//!
//! - `occurred_at` is required. The caller either gets a distinguishable
//!   [`SmartleadError::MissingOccurredAt`], or opts into the assume-now
//!   fill by supplying a timestamp captured **once per pull**, so every
//!   filled event in a batch shares the same capture instant.
//! - When the provider omits an event id, a deterministic fallback id is
//!   derived from the event's content, so structurally identical raws
//!   always map to the same id and downstream dedup still works.

use crate::error::SmartleadError;
use crate::types::RawEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use outreach_core::event::{ProviderEvent, ReplyLabel, idempotency_key};
use sha2::{Digest, Sha256};

/// Provider slug recorded on every canonical event.
pub const PROVIDER: &str = "smartlead";

/// Options controlling normalization of one pull/webhook batch.
#[derive(Clone, Debug, Default)]
pub struct NormalizeOptions {
    /// When set, events missing `occurred_at` are filled with this instant
    /// instead of failing. The caller captures it once per batch.
    pub assume_now: Option<DateTime<Utc>>,
}

/// Normalize one raw provider event.
///
/// Returns the canonical event plus a flag indicating whether the
/// `occurred_at` fill was applied, so callers can count fills per batch.
///
/// # Errors
///
/// Returns [`SmartleadError::MissingOccurredAt`] when the raw event has no
/// parseable timestamp and `opts.assume_now` is unset.
pub fn normalize_event(
    raw: RawEvent,
    opts: &NormalizeOptions,
) -> Result<(ProviderEvent, bool), SmartleadError> {
    let event_type = raw.event_type().unwrap_or_default().to_string();

    let (occurred_at, filled) = match raw.occurred_at() {
        Some(ts) => (ts, false),
        None => match opts.assume_now {
            Some(now) => (now, true),
            None => return Err(SmartleadError::MissingOccurredAt { event_type }),
        },
    };

    let outcome = raw.outcome().map(str::to_string);
    let contact_id = raw.contact_id().map(str::to_string);
    let outbound_id = raw.outbound_id().map(str::to_string);

    let provider_event_id = raw.provider_event_id().map_or_else(
        || fallback_event_id(occurred_at, outbound_id.as_deref(), &event_type, raw.payload()),
        str::to_string,
    );

    let reply_label = ReplyLabel::classify(&event_type, outcome.as_deref());
    let key = idempotency_key(PROVIDER, &provider_event_id);

    Ok((
        ProviderEvent {
            provider: PROVIDER.to_string(),
            provider_event_id: Some(provider_event_id),
            event_type,
            outcome,
            contact_id,
            outbound_id,
            occurred_at,
            payload: raw.into_payload(),
            idempotency_key: key,
            reply_label,
        },
        filled,
    ))
}

/// Deterministic event id for raws the provider did not assign one.
///
/// SHA-256 over `(provider, occurred_at, outbound_id, event_type, payload)`
/// in a fixed encoding: structurally identical raw events (including equal
/// `occurred_at`) always hash to the identical id.
fn fallback_event_id(
    occurred_at: DateTime<Utc>,
    outbound_id: Option<&str>,
    event_type: &str,
    payload: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(PROVIDER.as_bytes());
    hasher.update([0x1f]);
    hasher.update(occurred_at.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
    hasher.update([0x1f]);
    hasher.update(outbound_id.unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(event_type.as_bytes());
    hasher.update([0x1f]);
    // serde_json's default sorted-key object encoding keeps this canonical.
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn missing_occurred_at_is_rejected_without_opt_in() {
        let raw = RawEvent::new(json!({"id": "evt-1", "event_type": "open"}));
        let err = normalize_event(raw, &NormalizeOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SmartleadError::MissingOccurredAt { event_type } if event_type == "open"
        ));
    }

    #[test]
    fn assume_now_fills_with_the_supplied_instant() {
        let now = at("2025-06-01T12:00:00Z");
        let raw = RawEvent::new(json!({"id": "evt-1", "event_type": "open"}));
        let (event, filled) = normalize_event(
            raw,
            &NormalizeOptions {
                assume_now: Some(now),
            },
        )
        .unwrap();
        assert!(filled);
        assert_eq!(event.occurred_at, now);
    }

    #[test]
    fn present_timestamp_is_not_counted_as_filled() {
        let raw = RawEvent::new(json!({
            "id": "evt-1",
            "event_type": "open",
            "occurred_at": "2025-06-01T10:00:00Z",
        }));
        let (event, filled) = normalize_event(
            raw,
            &NormalizeOptions {
                assume_now: Some(at("2025-06-01T12:00:00Z")),
            },
        )
        .unwrap();
        assert!(!filled);
        assert_eq!(event.occurred_at, at("2025-06-01T10:00:00Z"));
    }

    #[test]
    fn missing_id_falls_back_to_stable_hash() {
        let payload = json!({
            "event_type": "click",
            "message_id": "msg-1",
            "occurred_at": "2025-06-01T10:00:00Z",
            "url": "https://example.com",
        });
        let (a, _) = normalize_event(RawEvent::new(payload.clone()), &NormalizeOptions::default())
            .unwrap();
        let (b, _) =
            normalize_event(RawEvent::new(payload), &NormalizeOptions::default()).unwrap();

        assert!(a.provider_event_id.is_some());
        assert_eq!(a.provider_event_id, b.provider_event_id);
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn fallback_id_differs_when_content_differs() {
        let base = json!({
            "event_type": "click",
            "occurred_at": "2025-06-01T10:00:00Z",
        });
        let mut other = base.clone();
        other["url"] = json!("https://example.com");

        let (a, _) =
            normalize_event(RawEvent::new(base), &NormalizeOptions::default()).unwrap();
        let (b, _) =
            normalize_event(RawEvent::new(other), &NormalizeOptions::default()).unwrap();
        assert_ne!(a.provider_event_id, b.provider_event_id);
    }

    #[test]
    fn normalization_maps_all_canonical_fields() {
        let raw = RawEvent::new(json!({
            "id": "evt-7",
            "event_type": "reply",
            "outcome": "meeting",
            "lead_id": "lead-3",
            "message_id": "msg-8",
            "occurred_at": "2025-06-01T10:00:00Z",
        }));
        let (event, _) = normalize_event(raw, &NormalizeOptions::default()).unwrap();

        assert_eq!(event.provider, PROVIDER);
        assert_eq!(event.provider_event_id.as_deref(), Some("evt-7"));
        assert_eq!(event.event_type, "reply");
        assert_eq!(event.outcome.as_deref(), Some("meeting"));
        assert_eq!(event.contact_id.as_deref(), Some("lead-3"));
        assert_eq!(event.outbound_id.as_deref(), Some("msg-8"));
        // event_type wins over outcome in the decision table
        assert_eq!(event.reply_label, Some(ReplyLabel::Replied));
        assert_eq!(event.payload["id"], json!("evt-7"));
    }
}
