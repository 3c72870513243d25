//! # Outreach Core
//!
//! Core domain types and traits for the Outreach campaign automation system.
//!
//! This crate defines the consistency layer every other crate programs
//! against:
//!
//! - **Filter engine** ([`filter`]): declarative audience filters validated
//!   into an ordered, canonical clause list with a stable fingerprint.
//! - **Segments and snapshots** ([`segment`]): a segment selects an audience;
//!   a snapshot freezes its membership at a point in time under a version
//!   number so downstream consumers read a reproducible set.
//! - **Canonical provider events** ([`event`]): the normalized shape every
//!   provider-side send/receive event is reduced to before storage.
//! - **Jobs** ([`job`]): async units of work with monotonic status
//!   progression.
//! - **Storage traits** ([`store`]): dyn-compatible persistence interfaces
//!   implemented by `outreach-postgres` (production) and `outreach-testing`
//!   (in-memory).
//!
//! ## Design principles
//!
//! - Validation is pure and deterministic; the same filter definition always
//!   produces the same clause list and fingerprint.
//! - Snapshot rows are write-once per `(segment, version)` refresh; readers
//!   never observe a partial set.
//! - Every mutating operation downstream of these types is safe to retry:
//!   snapshot replacement is version-scoped, event inserts are deduplicated
//!   by idempotency key.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod clock;
pub mod event;
pub mod filter;
pub mod job;
pub mod segment;
pub mod store;
