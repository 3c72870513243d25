//! In-memory implementations of the `outreach-core` storage traits.
//!
//! These mirror the production semantics the workflow relies on:
//!
//! - snapshot replacement swaps the whole membership set under one lock, so
//!   readers never observe a partial set;
//! - version bumps happen under the same lock that guards the segment map,
//!   so concurrent bumps yield distinct versions;
//! - provider-event inserts are insert-or-ignore keyed on
//!   `(provider, provider_event_id)`.
//!
//! [`InMemorySnapshotStore`] additionally counts `replace` calls so tests
//! can assert the reuse fast path performs zero writes.

use crate::fixtures::LiveMember;
use outreach_core::event::ProviderEvent;
use outreach_core::filter::ClauseList;
use outreach_core::job::{Job, JobStatus};
use outreach_core::segment::{
    CandidateMember, Segment, SegmentId, SegmentVersion, SnapshotMember,
};
use outreach_core::store::{
    JobStore, MemberSource, ProviderEventStore, SegmentStore, SnapshotStore, StoreError,
    StoreFuture,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// In-memory [`SegmentStore`].
#[derive(Default)]
pub struct InMemorySegmentStore {
    segments: Mutex<HashMap<SegmentId, Segment>>,
}

impl InMemorySegmentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a segment.
    pub async fn insert(&self, segment: Segment) {
        self.segments.lock().await.insert(segment.id.clone(), segment);
    }

    /// Read the currently stored version without going through the trait.
    pub async fn stored_version(&self, segment_id: &SegmentId) -> Option<SegmentVersion> {
        self.segments.lock().await.get(segment_id).map(|s| s.version)
    }
}

impl SegmentStore for InMemorySegmentStore {
    fn get(&self, segment_id: SegmentId) -> StoreFuture<'_, Segment> {
        Box::pin(async move {
            self.segments
                .lock()
                .await
                .get(&segment_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("segment {segment_id}")))
        })
    }

    fn bump_version(&self, segment_id: SegmentId) -> StoreFuture<'_, SegmentVersion> {
        Box::pin(async move {
            let mut segments = self.segments.lock().await;
            let segment = segments
                .get_mut(&segment_id)
                .ok_or_else(|| StoreError::NotFound(format!("segment {segment_id}")))?;
            segment.version = segment.version.next();
            Ok(segment.version)
        })
    }
}

/// In-memory [`SnapshotStore`] with a write counter.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    rows: Mutex<HashMap<(SegmentId, SegmentVersion), Vec<SnapshotMember>>>,
    replace_calls: AtomicUsize,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`SnapshotStore::replace`] has been called.
    #[must_use]
    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn replace(
        &self,
        segment_id: SegmentId,
        version: SegmentVersion,
        members: Vec<SnapshotMember>,
    ) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            self.replace_calls.fetch_add(1, Ordering::SeqCst);
            let inserted = members.len();
            let mut rows = self.rows.lock().await;
            // Single lock acquisition: delete + insert are one atomic swap
            // from any reader's point of view.
            rows.insert((segment_id, version), members);
            Ok(inserted)
        })
    }

    fn count(&self, segment_id: SegmentId, version: SegmentVersion) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            Ok(self
                .rows
                .lock()
                .await
                .get(&(segment_id, version))
                .map_or(0, Vec::len))
        })
    }

    fn members(
        &self,
        segment_id: SegmentId,
        version: SegmentVersion,
    ) -> StoreFuture<'_, Vec<SnapshotMember>> {
        Box::pin(async move {
            Ok(self
                .rows
                .lock()
                .await
                .get(&(segment_id, version))
                .cloned()
                .unwrap_or_default())
        })
    }
}

/// In-memory [`MemberSource`] evaluating clause lists against fixture rows
/// with the reference predicate semantics.
#[derive(Default)]
pub struct InMemoryMemberSource {
    members: Mutex<Vec<LiveMember>>,
}

impl InMemoryMemberSource {
    /// Create a source over the given live rows.
    #[must_use]
    pub fn new(members: Vec<LiveMember>) -> Self {
        Self {
            members: Mutex::new(members),
        }
    }

    /// Add a live row.
    pub async fn push(&self, member: LiveMember) {
        self.members.lock().await.push(member);
    }

    /// Mutate a live row's contact field, simulating source data drifting
    /// after a snapshot was captured.
    pub async fn set_contact_field(&self, contact_id: &str, key: &str, value: serde_json::Value) {
        let mut members = self.members.lock().await;
        for member in members.iter_mut() {
            if member.contact_id == contact_id {
                member.contact.insert(key.to_string(), value.clone());
            }
        }
    }
}

impl MemberSource for InMemoryMemberSource {
    fn find_members(
        &self,
        clauses: ClauseList,
        limit: Option<usize>,
    ) -> StoreFuture<'_, Vec<CandidateMember>> {
        Box::pin(async move {
            let members = self.members.lock().await;
            let mut matched = Vec::new();
            for member in members.iter() {
                if clauses.matches(&member.contact, &member.company) {
                    matched.push(CandidateMember {
                        contact_id: member.contact_id.clone(),
                        company_id: member.company_id.clone(),
                        captured: member.captured(),
                    });
                    if limit.is_some_and(|cap| matched.len() >= cap) {
                        break;
                    }
                }
            }
            Ok(matched)
        })
    }
}

/// In-memory [`ProviderEventStore`] with insert-or-ignore dedup.
#[derive(Default)]
pub struct InMemoryProviderEventStore {
    events: Mutex<Vec<ProviderEvent>>,
}

impl InMemoryProviderEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

impl ProviderEventStore for InMemoryProviderEventStore {
    fn insert_if_absent(&self, event: ProviderEvent) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut events = self.events.lock().await;
            // Check and insert under one lock, matching the uniqueness
            // constraint the production store enforces.
            if let Some(id) = &event.provider_event_id {
                let exists = events.iter().any(|e| {
                    e.provider == event.provider && e.provider_event_id.as_deref() == Some(id)
                });
                if exists {
                    return Ok(false);
                }
            }
            events.push(event);
            Ok(true)
        })
    }

    fn find_by_provider_id(
        &self,
        provider: String,
        provider_event_id: String,
    ) -> StoreFuture<'_, Option<ProviderEvent>> {
        Box::pin(async move {
            Ok(self
                .events
                .lock()
                .await
                .iter()
                .find(|e| {
                    e.provider == provider
                        && e.provider_event_id.as_deref() == Some(provider_event_id.as_str())
                })
                .cloned())
        })
    }
}

/// In-memory [`JobStore`] enforcing monotonic transitions.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored jobs, for assertions.
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().await.values().cloned().collect()
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: Job) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.jobs.lock().await.insert(job.id.clone(), job);
            Ok(())
        })
    }

    fn transition(
        &self,
        job_id: String,
        status: JobStatus,
        result: Option<serde_json::Value>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
            job.transition(status, result)?;
            Ok(())
        })
    }

    fn get(&self, job_id: String) -> StoreFuture<'_, Job> {
        Box::pin(async move {
            self.jobs
                .lock()
                .await
                .get(&job_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))
        })
    }
}
