//! Storage traits for the consistency layer.
//!
//! These traits are deliberately minimal: they cover exactly what the
//! snapshot workflow and the ingestion pipeline need, nothing more. Two
//! implementations exist:
//!
//! - `outreach-postgres` (production): sqlx-backed, with the invariant
//!   surfaces expressed as real constraints.
//! - `outreach-testing` (tests): in-memory, mirroring the same semantics.
//!
//! # Dyn compatibility
//!
//! All methods return explicit `Pin<Box<dyn Future>>` instead of `async fn`
//! so workflows can hold `Arc<dyn SnapshotStore>` et al. The [`StoreFuture`]
//! alias keeps signatures readable.
//!
//! # Retry safety
//!
//! Every mutating method here is safe to retry by construction: snapshot
//! replacement is scoped to one `(segment, version)` key, event inserts are
//! insert-or-ignore on the dedup key, and version bumps are atomic
//! single-statement increments in the backing store.

use crate::event::ProviderEvent;
use crate::filter::ClauseList;
use crate::job::{Job, JobStatus};
use crate::segment::{CandidateMember, Segment, SegmentId, SegmentVersion, SnapshotMember};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by storage trait methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors from storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization error while mapping rows.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored filter definition failed re-validation on load.
    #[error("Stored filter is invalid: {0}")]
    InvalidStoredFilter(#[from] crate::filter::FilterError),

    /// A job status transition violated monotonicity.
    #[error(transparent)]
    JobTransition(#[from] crate::job::JobTransitionError),
}

/// Persistence for segments and their version counters.
pub trait SegmentStore: Send + Sync {
    /// Load a segment by id.
    ///
    /// The stored filter definition is re-validated on load, so a `Segment`
    /// obtained here always carries a canonical [`ClauseList`].
    fn get(&self, segment_id: SegmentId) -> StoreFuture<'_, Segment>;

    /// Atomically increment the segment's version counter and return the
    /// new value.
    ///
    /// Implementations must perform the increment in the backing store
    /// (single-statement `UPDATE ... RETURNING` or compare-and-swap), never
    /// as an application-memory read-modify-write — two concurrent bumps
    /// must yield two distinct versions.
    fn bump_version(&self, segment_id: SegmentId) -> StoreFuture<'_, SegmentVersion>;
}

/// Persistence for version-scoped snapshot membership.
pub trait SnapshotStore: Send + Sync {
    /// Atomically replace all membership rows for `(segment_id, version)`.
    ///
    /// Deletes whatever existed for the key, then inserts `members`, inside
    /// one write barrier: a concurrent reader observes either the old set or
    /// the new set, never a partial one. An empty `members` list is valid
    /// and leaves the version empty (caller policy decides whether that is
    /// acceptable).
    ///
    /// Returns the number of rows inserted.
    fn replace(
        &self,
        segment_id: SegmentId,
        version: SegmentVersion,
        members: Vec<SnapshotMember>,
    ) -> StoreFuture<'_, usize>;

    /// Count membership rows for `(segment_id, version)`.
    fn count(&self, segment_id: SegmentId, version: SegmentVersion) -> StoreFuture<'_, usize>;

    /// Load all membership rows for `(segment_id, version)`.
    fn members(
        &self,
        segment_id: SegmentId,
        version: SegmentVersion,
    ) -> StoreFuture<'_, Vec<SnapshotMember>>;
}

/// The live query surface filters are re-evaluated against.
///
/// Implementations translate the clause list into a predicate over the two
/// joined entity families (contacts ⋈ companies). `limit` bounds the result
/// set; the workflow passes `cap + 1` to detect size overflow without an
/// unbounded read.
pub trait MemberSource: Send + Sync {
    /// Find live members matching every clause.
    fn find_members(
        &self,
        clauses: ClauseList,
        limit: Option<usize>,
    ) -> StoreFuture<'_, Vec<CandidateMember>>;
}

/// Persistence for canonical provider events.
pub trait ProviderEventStore: Send + Sync {
    /// Insert the event unless a row with the same
    /// `(provider, provider_event_id)` already exists.
    ///
    /// Returns `true` when the row was inserted, `false` on a dedup hit.
    /// The uniqueness check lives in the storage layer (insert-or-ignore on
    /// a unique key), so two concurrent inserts of the same event cannot
    /// both succeed. Events without a provider event id are always inserted.
    fn insert_if_absent(&self, event: ProviderEvent) -> StoreFuture<'_, bool>;

    /// Look up a stored event by its provider-assigned id.
    fn find_by_provider_id(
        &self,
        provider: String,
        provider_event_id: String,
    ) -> StoreFuture<'_, Option<ProviderEvent>>;
}

/// Persistence for jobs.
pub trait JobStore: Send + Sync {
    /// Persist a freshly created job.
    fn create(&self, job: Job) -> StoreFuture<'_, ()>;

    /// Transition a job to a new status, recording an optional result.
    ///
    /// Implementations enforce the monotonic transition rules of
    /// [`JobStatus::can_transition_to`](crate::job::JobStatus::can_transition_to).
    fn transition(
        &self,
        job_id: String,
        status: JobStatus,
        result: Option<serde_json::Value>,
    ) -> StoreFuture<'_, ()>;

    /// Load a job by id.
    fn get(&self, job_id: String) -> StoreFuture<'_, Job>;
}
