//! Smartlead API client implementation.

use crate::error::SmartleadError;
use crate::normalize::{NormalizeOptions, normalize_event};
use crate::types::{
    Campaign, CampaignsResponse, EventsResponse, ListOptions, PullOptions, PullOutcome, PullQuery,
    RawEvent,
};
use chrono::{DateTime, Utc};
use outreach_core::clock::{Clock, SystemClock};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Default cap on the Retry-After wait, in milliseconds.
pub const DEFAULT_RETRY_AFTER_CAP_MS: u64 = 5000;

/// Fallback wait when a retryable response carries no usable Retry-After.
const DEFAULT_RETRY_SLEEP_MS: u64 = 50;

/// Total attempts per GET: the original call plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// Environment variable holding the API base URL.
pub const ENV_BASE_URL: &str = "SMARTLEAD_BASE_URL";
/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "SMARTLEAD_API_KEY";
/// Environment variable holding the optional workspace id.
pub const ENV_WORKSPACE_ID: &str = "SMARTLEAD_WORKSPACE_ID";
/// Environment variable overriding the Retry-After cap (milliseconds).
pub const ENV_RETRY_AFTER_CAP_MS: &str = "SMARTLEAD_RETRY_AFTER_CAP_MS";

const HEADER_WORKSPACE: &str = "X-Workspace-Id";

/// Connection configuration for [`SmartleadClient`].
#[derive(Clone, Debug)]
pub struct SmartleadConfig {
    /// API base URL, e.g. `https://server.smartlead.ai/api/v1`.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Workspace scoping header value, when the account has one.
    pub workspace_id: Option<String>,
    /// Environment-level cap on the Retry-After wait. Per-call options can
    /// override it; absent both, [`DEFAULT_RETRY_AFTER_CAP_MS`] applies.
    pub retry_after_cap: Option<Duration>,
}

impl SmartleadConfig {
    /// Create a config with explicit base URL and API key.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            workspace_id: None,
            retry_after_cap: None,
        }
    }

    /// Set the workspace id sent as `X-Workspace-Id`.
    #[must_use]
    pub fn with_workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    /// Set the environment-level Retry-After cap.
    #[must_use]
    pub const fn with_retry_after_cap(mut self, cap: Duration) -> Self {
        self.retry_after_cap = Some(cap);
        self
    }

    /// Build the config from `SMARTLEAD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`SmartleadError::MissingEnv`] when base URL or API key are
    /// unset, and [`SmartleadError::InvalidEnv`] when the cap override is
    /// not a millisecond integer.
    pub fn from_env() -> Result<Self, SmartleadError> {
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| SmartleadError::MissingEnv { var: ENV_BASE_URL })?;
        let api_key = std::env::var(ENV_API_KEY)
            .map_err(|_| SmartleadError::MissingEnv { var: ENV_API_KEY })?;
        let workspace_id = std::env::var(ENV_WORKSPACE_ID).ok();
        let retry_after_cap = match std::env::var(ENV_RETRY_AFTER_CAP_MS) {
            Ok(value) => {
                let millis = value.trim().parse::<u64>().map_err(|_| {
                    SmartleadError::InvalidEnv {
                        var: ENV_RETRY_AFTER_CAP_MS,
                        value,
                    }
                })?;
                Some(Duration::from_millis(millis))
            }
            Err(_) => None,
        };

        Ok(Self {
            base_url,
            api_key,
            workspace_id,
            retry_after_cap,
        })
    }
}

/// Smartlead API client with bounded retry.
#[derive(Clone)]
pub struct SmartleadClient {
    client: Client,
    config: SmartleadConfig,
    clock: Arc<dyn Clock>,
}

impl SmartleadClient {
    /// Create a client over the given config using the system clock.
    #[must_use]
    pub fn new(config: SmartleadConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a client with an injected clock.
    ///
    /// The clock drives the assume-now timestamp fill and Retry-After date
    /// arithmetic; tests pin it for determinism.
    #[must_use]
    pub fn with_clock(config: SmartleadConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: Client::new(),
            config,
            clock,
        }
    }

    /// List campaigns.
    ///
    /// With `dry_run` set, returns an empty list without any network call.
    ///
    /// # Errors
    ///
    /// Returns [`SmartleadError`] for transport failures, non-2xx responses
    /// (after at most one retry on 5xx/429), or unparseable bodies.
    pub async fn list_campaigns(&self, opts: ListOptions) -> Result<Vec<Campaign>, SmartleadError> {
        if opts.dry_run {
            tracing::debug!("dry run: skipping campaigns request");
            return Ok(Vec::new());
        }

        let url = format!("{}/campaigns", self.base());
        let body = self.get_with_retry(&url, opts.retry_after_cap).await?;
        let response: CampaignsResponse = serde_json::from_str(&body)
            .map_err(|e| SmartleadError::ResponseParseFailed(e.to_string()))?;
        Ok(response.campaigns)
    }

    /// Pull events and normalize them into canonical shape.
    ///
    /// With `dry_run` set, returns an empty outcome without any network
    /// call. With `assume_now_occurred_at` set, events missing their
    /// timestamp are filled with one instant captured once for the whole
    /// pull; the outcome reports how many were filled.
    ///
    /// # Errors
    ///
    /// Returns [`SmartleadError`] for transport failures, non-2xx responses
    /// (after at most one retry on 5xx/429), unparseable bodies, or a
    /// missing `occurred_at` without the fill opt-in.
    pub async fn pull_events(
        &self,
        query: PullQuery,
        opts: PullOptions,
    ) -> Result<PullOutcome, SmartleadError> {
        if opts.dry_run {
            tracing::debug!("dry run: skipping events pull");
            return Ok(PullOutcome::default());
        }

        let url = self.events_url(&query)?;
        let body = self.get_with_retry(url.as_str(), opts.retry_after_cap).await?;
        let response: EventsResponse = serde_json::from_str(&body)
            .map_err(|e| SmartleadError::ResponseParseFailed(e.to_string()))?;

        // Captured once: every filled event in this pull shares the instant.
        let normalize_opts = NormalizeOptions {
            assume_now: opts.assume_now_occurred_at.then(|| self.clock.now()),
        };

        let mut events = Vec::with_capacity(response.events.len());
        let mut filled = 0_usize;
        for raw in response.events {
            let (event, was_filled) = normalize_event(RawEvent::new(raw), &normalize_opts)?;
            filled += usize::from(was_filled);
            events.push(event);
        }

        metrics::counter!("provider.events.pulled").increment(events.len() as u64);
        if filled > 0 {
            metrics::counter!("provider.events.occurred_at_filled").increment(filled as u64);
            tracing::warn!(filled, "filled missing occurred_at with pull capture time");
        }

        Ok(PullOutcome {
            events,
            filled_occurred_at: filled,
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn events_url(&self, query: &PullQuery) -> Result<reqwest::Url, SmartleadError> {
        let mut url = reqwest::Url::parse(&format!("{}/events", self.base()))
            .map_err(|e| SmartleadError::RequestFailed(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(since) = query.since {
                pairs.append_pair("since", &since.to_rfc3339());
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    /// GET with the bounded retry policy: one retry on 5xx/429, waiting
    /// `min(Retry-After, cap)` in between. Any other failure, and the
    /// failure of the retry itself, surfaces immediately.
    async fn get_with_retry(
        &self,
        url: &str,
        cap_override: Option<Duration>,
    ) -> Result<String, SmartleadError> {
        let cap = cap_override
            .or(self.config.retry_after_cap)
            .unwrap_or(Duration::from_millis(DEFAULT_RETRY_AFTER_CAP_MS));

        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err((error, retry_after)) if attempt < MAX_ATTEMPTS && error.is_retryable() => {
                    let wait = retry_wait(retry_after, cap);
                    tracing::warn!(
                        url,
                        %error,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "retrying after transient provider failure"
                    );
                    metrics::counter!("provider.retry.slept").increment(1);
                    // Cooperative sleep: yields the executor instead of
                    // blocking unrelated work.
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                // Non-retryable, or the retry itself failed: the caller
                // sees this attempt's error, not the first one.
                Err((error, _)) => return Err(error),
            }
        }
    }

    /// Perform a single GET attempt.
    ///
    /// The body is read exactly once, success or failure; a stream-based
    /// transport throws on a second read, so classification works off the
    /// already-consumed text.
    async fn get_once(
        &self,
        url: &str,
    ) -> Result<String, (SmartleadError, Option<Duration>)> {
        let mut request = self.client.get(url).bearer_auth(&self.config.api_key);
        if let Some(workspace) = &self.config.workspace_id {
            request = request.header(HEADER_WORKSPACE, workspace.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| (SmartleadError::RequestFailed(e.to_string()), None))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|value| parse_retry_after(value, self.clock.now()));

        let body = response
            .text()
            .await
            .map_err(|e| (SmartleadError::RequestFailed(e.to_string()), None))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err((SmartleadError::api(status, url, &body), retry_after))
        }
    }
}

/// Compute the wait before the single retry: the provider's Retry-After
/// when present (else a small default), clamped to the cap.
fn retry_wait(retry_after: Option<Duration>, cap: Duration) -> Duration {
    retry_after
        .unwrap_or(Duration::from_millis(DEFAULT_RETRY_SLEEP_MS))
        .min(cap)
}

/// Parse a Retry-After header value: either integer seconds or an HTTP-date
/// (RFC 2822), the latter computed as `max(0, date - now)`.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let millis = (date.with_timezone(&Utc) - now).num_milliseconds();
    Some(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn retry_after_numeric_seconds() {
        let wait = parse_retry_after("10", at("2025-01-01T00:00:00Z")).unwrap();
        assert_eq!(wait, Duration::from_secs(10));
    }

    #[test]
    fn retry_after_http_date() {
        let now = at("2025-01-01T00:00:00Z");
        let wait = parse_retry_after("Wed, 01 Jan 2025 00:00:07 GMT", now).unwrap();
        assert_eq!(wait, Duration::from_secs(7));
    }

    #[test]
    fn retry_after_past_date_clamps_to_zero() {
        let now = at("2025-01-01T00:01:00Z");
        let wait = parse_retry_after("Wed, 01 Jan 2025 00:00:00 GMT", now).unwrap();
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn retry_after_garbage_is_ignored() {
        assert!(parse_retry_after("soon", at("2025-01-01T00:00:00Z")).is_none());
    }

    #[test]
    fn cap_wins_over_larger_header() {
        // Retry-After: 10s against a 5000ms cap sleeps exactly 5000ms.
        let wait = retry_wait(Some(Duration::from_secs(10)), Duration::from_millis(5000));
        assert_eq!(wait, Duration::from_millis(5000));
    }

    #[test]
    fn header_wins_under_larger_cap() {
        // Retry-After: 10s against a 20000ms cap sleeps exactly 10000ms.
        let wait = retry_wait(Some(Duration::from_secs(10)), Duration::from_millis(20_000));
        assert_eq!(wait, Duration::from_millis(10_000));
    }

    #[test]
    fn missing_header_uses_small_default() {
        let wait = retry_wait(None, Duration::from_millis(5000));
        assert_eq!(wait, Duration::from_millis(DEFAULT_RETRY_SLEEP_MS));
    }

    #[test]
    fn config_builders() {
        let config = SmartleadConfig::new("https://api.example.com", "key")
            .with_workspace_id("ws-1")
            .with_retry_after_cap(Duration::from_millis(250));
        assert_eq!(config.workspace_id.as_deref(), Some("ws-1"));
        assert_eq!(config.retry_after_cap, Some(Duration::from_millis(250)));
    }

    #[test]
    fn base_url_trailing_slash_is_tolerated() {
        let client = SmartleadClient::new(SmartleadConfig::new("https://api.example.com/", "key"));
        assert_eq!(client.base(), "https://api.example.com");
    }
}
