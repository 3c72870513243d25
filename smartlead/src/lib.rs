//! # Smartlead Provider Client
//!
//! HTTP client for the Smartlead campaign/event API with bounded retry,
//! backoff, error classification, and normalization of raw provider events
//! into the canonical `outreach-core` event shape.
//!
//! ## Example
//!
//! ```no_run
//! use outreach_smartlead::{SmartleadClient, SmartleadConfig, PullQuery, PullOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Config from SMARTLEAD_* environment variables
//!     let client = SmartleadClient::new(SmartleadConfig::from_env()?);
//!
//!     let outcome = client
//!         .pull_events(PullQuery::default(), PullOptions::default())
//!         .await?;
//!
//!     println!("pulled {} events", outcome.events.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Resilience contract
//!
//! - 5xx and 429 responses are retried exactly once, sleeping
//!   `min(Retry-After, cap)` in between; every other non-2xx fails
//!   immediately.
//! - Response bodies are read exactly once per attempt.
//! - Errors carry status, status text, request URL, and a body snippet
//!   capped at 500 characters.
//! - `dry_run` short-circuits to an empty result with no network call.

pub mod client;
pub mod error;
pub mod normalize;
pub mod types;

pub use client::{SmartleadClient, SmartleadConfig, DEFAULT_RETRY_AFTER_CAP_MS};
pub use error::SmartleadError;
pub use normalize::{NormalizeOptions, normalize_event};
pub use types::{Campaign, ListOptions, PullOptions, PullOutcome, PullQuery, RawEvent};
