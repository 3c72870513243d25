//! Error types for the Smartlead API client.

use thiserror::Error;

/// Maximum number of characters of response body carried in an API error.
pub const BODY_SNIPPET_MAX: usize = 500;

/// Errors that can occur when interacting with the Smartlead API.
#[derive(Debug, Error)]
pub enum SmartleadError {
    /// A required environment variable is not set.
    #[error("Missing {var} environment variable")]
    MissingEnv {
        /// The variable name.
        var: &'static str,
    },

    /// An environment variable is set but unparseable.
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// The offending value.
        value: String,
    },

    /// HTTP transport failure (connect, TLS, body read).
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Response body failed to parse as the expected shape.
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// The API returned a non-2xx response.
    ///
    /// Carries everything a caller needs to act without re-deriving state:
    /// status, canonical status text, the request URL, and a bounded body
    /// snippet.
    #[error("Smartlead API error (status {status} {status_text}) at {url}: {snippet}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Canonical status text, e.g. `Bad Gateway`.
        status_text: String,
        /// The request URL.
        url: String,
        /// Body snippet, at most [`BODY_SNIPPET_MAX`] characters plus a
        /// truncation marker.
        snippet: String,
    },

    /// A raw event is missing its required `occurred_at` timestamp and the
    /// caller did not opt into the assume-now fill.
    #[error("Provider event of type {event_type:?} has no occurred_at timestamp")]
    MissingOccurredAt {
        /// The event type of the offending raw event.
        event_type: String,
    },
}

impl SmartleadError {
    /// Build an [`Api`](Self::Api) error from a response's parts.
    ///
    /// The snippet prefers a JSON `error` / `message` field when the body
    /// parses as JSON, else the raw body; either way it is capped at
    /// [`BODY_SNIPPET_MAX`] characters with an explicit `...(truncated)`
    /// marker.
    #[must_use]
    pub fn api(status: reqwest::StatusCode, url: &str, body: &str) -> Self {
        Self::Api {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            url: url.to_string(),
            snippet: body_snippet(body),
        }
    }

    /// Whether this error came from a retryable response (5xx or 429).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status >= 500 || *status == 429)
    }
}

/// Extract the bounded snippet for an API error body.
fn body_snippet(body: &str) -> String {
    let source = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(|v| v.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string());

    let mut snippet: String = source.chars().take(BODY_SNIPPET_MAX).collect();
    if source.chars().count() > BODY_SNIPPET_MAX {
        snippet.push_str("...(truncated)");
    }
    snippet
}
