//! Canonical provider events and reply classification.
//!
//! Every send/receive event — whether pulled from the provider API or pushed
//! over a webhook — is reduced to the single [`ProviderEvent`] shape before
//! it reaches storage. Events are created once and never mutated; duplicate
//! ingestion attempts are detected through the idempotency key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Coarse reply classification derived from a fixed decision table.
///
/// The table, applied in order:
///
/// 1. `event_type == "reply"` → [`Replied`](Self::Replied)
/// 2. outcome ∈ {`angry`, `decline`} → [`Negative`](Self::Negative)
/// 3. outcome ∈ {`meeting`, `soft_interest`} → [`Positive`](Self::Positive)
/// 4. otherwise → no label
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyLabel {
    /// The contact replied; sentiment not yet determined.
    Replied,
    /// Positive outcome (meeting booked, soft interest).
    Positive,
    /// Negative outcome (angry reply, decline).
    Negative,
}

impl ReplyLabel {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }

    /// Parse from the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "replied" => Some(Self::Replied),
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }

    /// Apply the classification decision table.
    #[must_use]
    pub fn classify(event_type: &str, outcome: Option<&str>) -> Option<Self> {
        if event_type == "reply" {
            return Some(Self::Replied);
        }
        match outcome {
            Some("angry" | "decline") => Some(Self::Negative),
            Some("meeting" | "soft_interest") => Some(Self::Positive),
            _ => None,
        }
    }
}

impl fmt::Display for ReplyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical, storage-ready shape of one provider event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// Provider slug, e.g. `smartlead`.
    pub provider: String,
    /// The provider's own event id, when it supplies one. May instead hold
    /// a deterministic fallback id derived by the integration client.
    pub provider_event_id: Option<String>,
    /// Provider event type, e.g. `sent`, `open`, `reply`, `bounce`.
    pub event_type: String,
    /// Provider outcome classification, e.g. `meeting`, `decline`.
    pub outcome: Option<String>,
    /// Local contact the event refers to, when resolvable.
    pub contact_id: Option<String>,
    /// Local outbound message the event refers to, when resolvable.
    pub outbound_id: Option<String>,
    /// When the event occurred at the provider. Required; the integration
    /// client enforces presence (or an explicit fill policy) upstream.
    pub occurred_at: DateTime<Utc>,
    /// The raw provider payload, kept verbatim for audits and reprocessing.
    pub payload: serde_json::Value,
    /// Deterministic dedup key, see [`idempotency_key`].
    pub idempotency_key: String,
    /// Reply classification, see [`ReplyLabel::classify`].
    pub reply_label: Option<ReplyLabel>,
}

/// Derive the deterministic idempotency key for `(provider, event_ref)`.
///
/// `event_ref` is the provider's event id when one exists, or the
/// deterministic fallback id computed by the integration client. When
/// neither exists the caller substitutes a random UUID — accepted only for
/// truly anonymous events, since such a key is not reproducible across
/// retries of the same logical event.
#[must_use]
pub fn idempotency_key(provider: &str, event_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0x1f]);
    hasher.update(event_ref.as_bytes());
    hex::encode(hasher.finalize())
}
