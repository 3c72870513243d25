//! Wire types for the Smartlead API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One campaign as returned by `GET /campaigns`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    /// Provider-side campaign id.
    pub id: String,
    /// Campaign display name.
    pub name: String,
    /// Provider status string, e.g. `ACTIVE`, `PAUSED`.
    pub status: Option<String>,
    /// Creation timestamp, when the provider reports one.
    pub created_at: Option<DateTime<Utc>>,
}

/// Response envelope of `GET /campaigns`.
#[derive(Debug, Deserialize)]
pub(crate) struct CampaignsResponse {
    pub campaigns: Vec<Campaign>,
}

/// Response envelope of `GET /events`.
#[derive(Debug, Deserialize)]
pub(crate) struct EventsResponse {
    pub events: Vec<serde_json::Value>,
}

/// One raw provider event, kept as verbatim JSON.
///
/// The provider's event shape is loosely specified and drifts between
/// webhook and pull payloads, so this is a thin accessor view over the raw
/// object rather than a strict deserialization. The full object survives
/// into the canonical event's `payload` untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent(serde_json::Value);

impl RawEvent {
    /// Wrap a raw provider event object.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    fn str_field(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.0.get(k).and_then(|v| v.as_str()))
    }

    /// The provider's event id, when supplied (`id` / `event_id`).
    #[must_use]
    pub fn provider_event_id(&self) -> Option<&str> {
        self.str_field(&["id", "event_id"])
    }

    /// The event type (`event_type` / `type`).
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.str_field(&["event_type", "type"])
    }

    /// The provider's outcome classification (`outcome` / `category`).
    #[must_use]
    pub fn outcome(&self) -> Option<&str> {
        self.str_field(&["outcome", "category"])
    }

    /// The contact reference (`contact_id` / `lead_id`).
    #[must_use]
    pub fn contact_id(&self) -> Option<&str> {
        self.str_field(&["contact_id", "lead_id"])
    }

    /// The outbound message reference (`outbound_id` / `message_id`).
    #[must_use]
    pub fn outbound_id(&self) -> Option<&str> {
        self.str_field(&["outbound_id", "message_id"])
    }

    /// The event timestamp (`occurred_at` / `timestamp`), parsed as RFC 3339.
    #[must_use]
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.str_field(&["occurred_at", "timestamp"])
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The verbatim payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consume into the verbatim payload.
    #[must_use]
    pub fn into_payload(self) -> serde_json::Value {
        self.0
    }
}

/// Query parameters for [`pull_events`](crate::SmartleadClient::pull_events).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PullQuery {
    /// Only events at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of events to return.
    pub limit: Option<u32>,
}

/// Per-call options for [`pull_events`](crate::SmartleadClient::pull_events).
#[derive(Clone, Debug, Default)]
pub struct PullOptions {
    /// Skip the network entirely and return an empty outcome.
    pub dry_run: bool,
    /// Fill missing `occurred_at` timestamps with one instant captured once
    /// for the whole pull, instead of failing.
    pub assume_now_occurred_at: bool,
    /// Per-call override of the Retry-After cap.
    pub retry_after_cap: Option<Duration>,
}

/// Per-call options for [`list_campaigns`](crate::SmartleadClient::list_campaigns).
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Skip the network entirely and return an empty list.
    pub dry_run: bool,
    /// Per-call override of the Retry-After cap.
    pub retry_after_cap: Option<Duration>,
}

/// Result of one pull: normalized events plus fill accounting.
#[derive(Clone, Debug, Default)]
pub struct PullOutcome {
    /// Canonical events in provider order.
    pub events: Vec<outreach_core::event::ProviderEvent>,
    /// How many events had their `occurred_at` filled by the assume-now
    /// policy. Zero unless the caller opted in.
    pub filled_occurred_at: usize,
}
