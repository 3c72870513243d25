//! Snapshot materialization workflow.
//!
//! The workflow is the only writer of snapshot membership and the only
//! owner of segment version bumps. Consumers never read snapshot rows
//! without first obtaining a [`SnapshotHandle`] from
//! [`SnapshotWorkflow::materialize`] — the `(version, count)` pair is the
//! whole contract, and it pins exactly which rows are valid for a run.
//!
//! Per invocation:
//!
//! 1. Resolve the target version: bump atomically, adopt an explicitly
//!    requested version (forced overrides only), or use the stored one.
//! 2. `Reuse` returns existing rows untouched when present (idempotent fast
//!    path); otherwise, and always under `Refresh`, filters are re-evaluated
//!    against live data and the snapshot is replaced wholesale.
//!
//! Size and emptiness guards run **before** any row is written. Refreshes
//! of the same `(segment, version)` are serialized through an advisory
//! lock, so two concurrent callers cannot interleave delete/insert.
//!
//! All errors are synchronous and non-retryable at this layer; the caller
//! decides whether to retry with different parameters.

use outreach_core::job::{Job, JobStatus};
use outreach_core::segment::{Segment, SegmentId, SegmentVersion};
use outreach_core::store::{JobStore, MemberSource, SegmentStore, SnapshotStore, StoreError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default cap on snapshot size, guarding downstream draft generation and
/// sending against resource exhaustion.
pub const DEFAULT_MAX_CONTACTS: usize = 5000;

/// Job type recorded for snapshot refreshes.
pub const JOB_TYPE_SNAPSHOT_REFRESH: &str = "snapshot_refresh";

/// Errors from snapshot materialization.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The filter matched no contacts and the caller did not allow an empty
    /// snapshot.
    #[error("Snapshot for segment {segment_id} v{version} matched no contacts")]
    EmptySnapshot {
        /// Segment being materialized.
        segment_id: SegmentId,
        /// Resolved target version.
        version: SegmentVersion,
    },

    /// The filter matched more contacts than the cap; nothing was written.
    #[error(
        "Snapshot for segment {segment_id} v{version} matched {matched} or more contacts, \
         exceeding the cap of {cap}"
    )]
    SnapshotTooLarge {
        /// Segment being materialized.
        segment_id: SegmentId,
        /// Resolved target version.
        version: SegmentVersion,
        /// Number of matches observed (bounded at `cap + 1`).
        matched: usize,
        /// The effective cap.
        cap: usize,
    },

    /// An explicit `segment_version` differs from the stored version and
    /// `force_version` was not set.
    #[error(
        "Requested version {requested} differs from stored version {stored} for segment \
         {segment_id}; pass force_version to adopt it"
    )]
    VersionMismatch {
        /// Segment being materialized.
        segment_id: SegmentId,
        /// The version the caller asked for.
        requested: SegmentVersion,
        /// The version the store holds.
        stored: SegmentVersion,
    },

    /// Underlying storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Stable error code for callers that dispatch on codes.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptySnapshot { .. } => "ERR_EMPTY_SNAPSHOT",
            Self::SnapshotTooLarge { .. } => "ERR_SNAPSHOT_TOO_LARGE",
            Self::VersionMismatch { .. } => "ERR_VERSION_MISMATCH",
            Self::Store(_) => "ERR_STORE",
        }
    }
}

/// Whether to reuse an existing snapshot or force a re-materialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Return existing rows for the resolved version when present; fall
    /// back to a refresh when none exist.
    Reuse,
    /// Always re-evaluate filters against live data and replace the
    /// snapshot. Under an unchanged version number this overwrites history;
    /// callers request it explicitly.
    Refresh,
}

/// Input to [`SnapshotWorkflow::materialize`].
#[derive(Clone, Debug)]
pub struct MaterializeRequest {
    /// Segment to materialize.
    pub segment_id: SegmentId,
    /// Reuse or refresh, see [`SnapshotMode`].
    pub mode: SnapshotMode,
    /// Explicit target version. Differing from the stored version is an
    /// error unless [`force_version`](Self::force_version) is set.
    pub segment_version: Option<SegmentVersion>,
    /// Atomically bump the stored version and materialize under the new
    /// value. Takes precedence over `segment_version`.
    pub bump_version: bool,
    /// Confirm adoption of a mismatching explicit version.
    pub force_version: bool,
    /// Accept a zero-member snapshot instead of failing.
    pub allow_empty: bool,
    /// Cap on snapshot size; defaults to [`DEFAULT_MAX_CONTACTS`].
    pub max_contacts: Option<usize>,
}

impl MaterializeRequest {
    /// A reuse request with default policies.
    #[must_use]
    pub const fn reuse(segment_id: SegmentId) -> Self {
        Self::new(segment_id, SnapshotMode::Reuse)
    }

    /// A refresh request with default policies.
    #[must_use]
    pub const fn refresh(segment_id: SegmentId) -> Self {
        Self::new(segment_id, SnapshotMode::Refresh)
    }

    const fn new(segment_id: SegmentId, mode: SnapshotMode) -> Self {
        Self {
            segment_id,
            mode,
            segment_version: None,
            bump_version: false,
            force_version: false,
            allow_empty: false,
            max_contacts: None,
        }
    }

    /// Target an explicit version.
    #[must_use]
    pub const fn with_version(mut self, version: SegmentVersion) -> Self {
        self.segment_version = Some(version);
        self
    }

    /// Bump the stored version before materializing.
    #[must_use]
    pub const fn bumping_version(mut self) -> Self {
        self.bump_version = true;
        self
    }

    /// Confirm a mismatching explicit version.
    #[must_use]
    pub const fn forcing_version(mut self) -> Self {
        self.force_version = true;
        self
    }

    /// Accept zero-member snapshots.
    #[must_use]
    pub const fn allowing_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// Override the size cap.
    #[must_use]
    pub const fn with_max_contacts(mut self, cap: usize) -> Self {
        self.max_contacts = Some(cap);
        self
    }
}

/// The pair consumers need: which version is valid for this run, and how
/// many members it holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotHandle {
    /// The materialized version.
    pub version: SegmentVersion,
    /// Membership count under that version.
    pub count: usize,
}

type RefreshKey = (SegmentId, SegmentVersion);

/// The snapshot materialization workflow.
pub struct SnapshotWorkflow {
    segments: Arc<dyn SegmentStore>,
    snapshots: Arc<dyn SnapshotStore>,
    members: Arc<dyn MemberSource>,
    jobs: Arc<dyn JobStore>,
    refresh_locks: Mutex<HashMap<RefreshKey, Arc<Mutex<()>>>>,
}

impl SnapshotWorkflow {
    /// Wire a workflow over the given stores.
    #[must_use]
    pub fn new(
        segments: Arc<dyn SegmentStore>,
        snapshots: Arc<dyn SnapshotStore>,
        members: Arc<dyn MemberSource>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            segments,
            snapshots,
            members,
            jobs,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Materialize a snapshot per the request and return its handle.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::VersionMismatch`] for an unforced explicit version
    ///   override
    /// - [`WorkflowError::EmptySnapshot`] when zero contacts match and
    ///   `allow_empty` is unset
    /// - [`WorkflowError::SnapshotTooLarge`] when matches exceed the cap
    ///   (checked before any write)
    /// - [`WorkflowError::Store`] for storage failures
    pub async fn materialize(
        &self,
        request: MaterializeRequest,
    ) -> Result<SnapshotHandle, WorkflowError> {
        let segment = self.segments.get(request.segment_id.clone()).await?;
        let version = self.resolve_version(&segment, &request).await?;

        if request.mode == SnapshotMode::Reuse {
            let count = self.snapshots.count(segment.id.clone(), version).await?;
            if count > 0 {
                let handle = Self::validated_handle(&segment.id, version, count, &request)?;
                tracing::debug!(segment = %segment.id, %version, count, "reusing existing snapshot");
                metrics::counter!("snapshot.reused").increment(1);
                return Ok(handle);
            }
            // No rows for this version: fall through to the refresh path.
        }

        self.refresh(&segment, version, &request).await
    }

    /// Step 1: decide which version this invocation operates on.
    async fn resolve_version(
        &self,
        segment: &Segment,
        request: &MaterializeRequest,
    ) -> Result<SegmentVersion, WorkflowError> {
        if request.bump_version {
            let version = self.segments.bump_version(segment.id.clone()).await?;
            tracing::info!(segment = %segment.id, %version, "bumped segment version");
            return Ok(version);
        }

        match request.segment_version {
            Some(requested) if requested != segment.version => {
                if request.force_version {
                    tracing::warn!(
                        segment = %segment.id,
                        requested = %requested,
                        stored = %segment.version,
                        "adopting forced version override"
                    );
                    Ok(requested)
                } else {
                    Err(WorkflowError::VersionMismatch {
                        segment_id: segment.id.clone(),
                        requested,
                        stored: segment.version,
                    })
                }
            }
            Some(requested) => Ok(requested),
            None => Ok(segment.version),
        }
    }

    /// Re-evaluate filters and replace the snapshot, serialized per
    /// `(segment, version)` and recorded as a job.
    async fn refresh(
        &self,
        segment: &Segment,
        version: SegmentVersion,
        request: &MaterializeRequest,
    ) -> Result<SnapshotHandle, WorkflowError> {
        let lock = self.refresh_lock(segment.id.clone(), version).await;
        let _guard = lock.lock().await;

        // A reuse caller that lost the lock race re-checks under the lock:
        // another writer may have materialized this version meanwhile.
        if request.mode == SnapshotMode::Reuse {
            let count = self.snapshots.count(segment.id.clone(), version).await?;
            if count > 0 {
                metrics::counter!("snapshot.reused").increment(1);
                return Self::validated_handle(&segment.id, version, count, request);
            }
        }

        let job = Job::new(
            JOB_TYPE_SNAPSHOT_REFRESH,
            json!({
                "segment_id": segment.id.as_str(),
                "version": version.value(),
                "allow_empty": request.allow_empty,
                "max_contacts": request.max_contacts,
            }),
        )
        .for_segment(segment.id.clone(), version);
        let job_id = job.id.clone();
        self.jobs.create(job).await?;
        self.jobs
            .transition(job_id.clone(), JobStatus::Running, None)
            .await?;

        match self.capture(segment, version, request).await {
            Ok(handle) => {
                self.jobs
                    .transition(
                        job_id,
                        JobStatus::Completed,
                        Some(json!({"version": handle.version.value(), "count": handle.count})),
                    )
                    .await?;
                Ok(handle)
            }
            Err(error) => {
                self.jobs
                    .transition(
                        job_id,
                        JobStatus::Failed,
                        Some(json!({"code": error.code(), "error": error.to_string()})),
                    )
                    .await?;
                Err(error)
            }
        }
    }

    /// The guarded query-check-replace sequence.
    async fn capture(
        &self,
        segment: &Segment,
        version: SegmentVersion,
        request: &MaterializeRequest,
    ) -> Result<SnapshotHandle, WorkflowError> {
        let cap = request.max_contacts.unwrap_or(DEFAULT_MAX_CONTACTS);

        // cap + 1 detects overflow without an unbounded read, and without
        // writing a single row first.
        let matched = self
            .members
            .find_members(segment.clauses.clone(), Some(cap + 1))
            .await?;

        if matched.len() > cap {
            return Err(WorkflowError::SnapshotTooLarge {
                segment_id: segment.id.clone(),
                version,
                matched: matched.len(),
                cap,
            });
        }
        if matched.is_empty() && !request.allow_empty {
            return Err(WorkflowError::EmptySnapshot {
                segment_id: segment.id.clone(),
                version,
            });
        }

        let members: Vec<_> = matched
            .into_iter()
            .map(|candidate| candidate.into_member(segment.id.clone(), version))
            .collect();
        let count = self.snapshots.replace(segment.id.clone(), version, members).await?;

        tracing::info!(segment = %segment.id, %version, count, "snapshot replaced");
        metrics::counter!("snapshot.replaced").increment(1);

        Ok(SnapshotHandle { version, count })
    }

    /// Apply the size/emptiness policies to an existing snapshot's count.
    fn validated_handle(
        segment_id: &SegmentId,
        version: SegmentVersion,
        count: usize,
        request: &MaterializeRequest,
    ) -> Result<SnapshotHandle, WorkflowError> {
        let cap = request.max_contacts.unwrap_or(DEFAULT_MAX_CONTACTS);
        if count > cap {
            return Err(WorkflowError::SnapshotTooLarge {
                segment_id: segment_id.clone(),
                version,
                matched: count,
                cap,
            });
        }
        if count == 0 && !request.allow_empty {
            return Err(WorkflowError::EmptySnapshot {
                segment_id: segment_id.clone(),
                version,
            });
        }
        Ok(SnapshotHandle { version, count })
    }

    async fn refresh_lock(&self, segment_id: SegmentId, version: SegmentVersion) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry((segment_id, version))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use outreach_core::filter::{ClauseInput, ClauseList};
    use outreach_core::job::JobStatus;
    use outreach_testing::fixtures::LiveMember;
    use outreach_testing::stores::{
        InMemoryJobStore, InMemoryMemberSource, InMemorySegmentStore, InMemorySnapshotStore,
    };
    use serde_json::json;

    struct Harness {
        segments: Arc<InMemorySegmentStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        members: Arc<InMemoryMemberSource>,
        jobs: Arc<InMemoryJobStore>,
        workflow: SnapshotWorkflow,
    }

    async fn harness(members: Vec<LiveMember>) -> Harness {
        let segments = Arc::new(InMemorySegmentStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let source = Arc::new(InMemoryMemberSource::new(members));
        let jobs = Arc::new(InMemoryJobStore::new());

        segments
            .insert(Segment {
                id: SegmentId::new("seg-1"),
                name: "CTOs".to_string(),
                locale: "en".to_string(),
                clauses: ClauseList::validate(&[ClauseInput::new(
                    "contacts.role",
                    "eq",
                    json!("CTO"),
                )])
                .unwrap(),
                version: SegmentVersion::FIRST,
                description: None,
                created_by: None,
            })
            .await;

        let workflow = SnapshotWorkflow::new(
            segments.clone(),
            snapshots.clone(),
            source.clone(),
            jobs.clone(),
        );
        Harness {
            segments,
            snapshots,
            members: source,
            jobs,
            workflow,
        }
    }

    fn cto(id: &str) -> LiveMember {
        LiveMember::new(id)
            .contact_field("role", json!("CTO"))
            .contact_field("name", json!(format!("Contact {id}")))
    }

    #[tokio::test]
    async fn refresh_with_no_matches_fails_unless_allowed() {
        let h = harness(vec![]).await;

        let err = h
            .workflow
            .materialize(MaterializeRequest::refresh(SegmentId::new("seg-1")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_EMPTY_SNAPSHOT");

        let handle = h
            .workflow
            .materialize(MaterializeRequest::refresh(SegmentId::new("seg-1")).allowing_empty())
            .await
            .unwrap();
        assert_eq!(handle.version, SegmentVersion::FIRST);
        assert_eq!(handle.count, 0);
    }

    #[tokio::test]
    async fn too_large_snapshot_writes_zero_rows() {
        let members = (0..11).map(|i| cto(&format!("c-{i}"))).collect();
        let h = harness(members).await;

        let err = h
            .workflow
            .materialize(
                MaterializeRequest::refresh(SegmentId::new("seg-1")).with_max_contacts(10),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_SNAPSHOT_TOO_LARGE");

        // The cap was enforced before any write.
        assert_eq!(h.snapshots.replace_calls(), 0);
        let count = h
            .snapshots
            .count(SegmentId::new("seg-1"), SegmentVersion::FIRST)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn reuse_is_idempotent_with_zero_additional_writes() {
        let h = harness(vec![cto("c-1"), cto("c-2")]).await;

        let first = h
            .workflow
            .materialize(MaterializeRequest::reuse(SegmentId::new("seg-1")))
            .await
            .unwrap();
        assert_eq!(first.count, 2);
        assert_eq!(h.snapshots.replace_calls(), 1);

        let second = h
            .workflow
            .materialize(MaterializeRequest::reuse(SegmentId::new("seg-1")))
            .await
            .unwrap();
        assert_eq!(second, first);
        // Fast path: no second write.
        assert_eq!(h.snapshots.replace_calls(), 1);
    }

    #[tokio::test]
    async fn refresh_always_rematerializes() {
        let h = harness(vec![cto("c-1")]).await;
        let request = MaterializeRequest::refresh(SegmentId::new("seg-1"));

        h.workflow.materialize(request.clone()).await.unwrap();
        h.workflow.materialize(request).await.unwrap();
        assert_eq!(h.snapshots.replace_calls(), 2);
    }

    #[tokio::test]
    async fn snapshot_freezes_attributes_at_capture_time() {
        let h = harness(vec![cto("c-1")]).await;
        let seg = SegmentId::new("seg-1");

        h.workflow
            .materialize(MaterializeRequest::refresh(seg.clone()))
            .await
            .unwrap();

        // Source data drifts after capture.
        h.members
            .set_contact_field("c-1", "name", json!("Renamed"))
            .await;

        let rows = h.snapshots.members(seg, SegmentVersion::FIRST).await.unwrap();
        assert_eq!(rows[0].captured.name.as_deref(), Some("Contact c-1"));
    }

    #[tokio::test]
    async fn bump_version_materializes_under_the_new_version() {
        let h = harness(vec![cto("c-1")]).await;

        let handle = h
            .workflow
            .materialize(MaterializeRequest::refresh(SegmentId::new("seg-1")).bumping_version())
            .await
            .unwrap();
        assert_eq!(handle.version, SegmentVersion::new(2));
        assert_eq!(
            h.segments.stored_version(&SegmentId::new("seg-1")).await,
            Some(SegmentVersion::new(2))
        );

        // Version 1 remains untouched (empty), version 2 holds the rows.
        let v1 = h
            .snapshots
            .count(SegmentId::new("seg-1"), SegmentVersion::FIRST)
            .await
            .unwrap();
        let v2 = h
            .snapshots
            .count(SegmentId::new("seg-1"), SegmentVersion::new(2))
            .await
            .unwrap();
        assert_eq!((v1, v2), (0, 1));
    }

    #[tokio::test]
    async fn mismatching_explicit_version_requires_force() {
        let h = harness(vec![cto("c-1")]).await;

        let err = h
            .workflow
            .materialize(
                MaterializeRequest::refresh(SegmentId::new("seg-1"))
                    .with_version(SegmentVersion::new(7)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_VERSION_MISMATCH");

        let handle = h
            .workflow
            .materialize(
                MaterializeRequest::refresh(SegmentId::new("seg-1"))
                    .with_version(SegmentVersion::new(7))
                    .forcing_version(),
            )
            .await
            .unwrap();
        assert_eq!(handle.version, SegmentVersion::new(7));
    }

    #[tokio::test]
    async fn matching_explicit_version_needs_no_force() {
        let h = harness(vec![cto("c-1")]).await;
        let handle = h
            .workflow
            .materialize(
                MaterializeRequest::refresh(SegmentId::new("seg-1"))
                    .with_version(SegmentVersion::FIRST),
            )
            .await
            .unwrap();
        assert_eq!(handle.version, SegmentVersion::FIRST);
    }

    #[tokio::test]
    async fn refresh_records_a_completed_job() {
        let h = harness(vec![cto("c-1")]).await;
        h.workflow
            .materialize(MaterializeRequest::refresh(SegmentId::new("seg-1")))
            .await
            .unwrap();

        let jobs = h.jobs.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, JOB_TYPE_SNAPSHOT_REFRESH);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].result, Some(json!({"version": 1, "count": 1})));
        assert_eq!(jobs[0].segment_id, Some(SegmentId::new("seg-1")));
    }

    #[tokio::test]
    async fn failed_refresh_records_a_failed_job() {
        let h = harness(vec![]).await;
        let _ = h
            .workflow
            .materialize(MaterializeRequest::refresh(SegmentId::new("seg-1")))
            .await
            .unwrap_err();

        let jobs = h.jobs.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        let result = jobs[0].result.as_ref().unwrap();
        assert_eq!(result["code"], json!("ERR_EMPTY_SNAPSHOT"));
    }

    #[tokio::test]
    async fn reuse_fast_path_skips_job_creation() {
        let h = harness(vec![cto("c-1")]).await;
        let request = MaterializeRequest::reuse(SegmentId::new("seg-1"));

        h.workflow.materialize(request.clone()).await.unwrap();
        h.workflow.materialize(request).await.unwrap();

        // Only the initial fall-through refresh produced a job.
        assert_eq!(h.jobs.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn reuse_validates_existing_count_against_cap() {
        let h = harness(vec![cto("c-1"), cto("c-2"), cto("c-3")]).await;
        h.workflow
            .materialize(MaterializeRequest::refresh(SegmentId::new("seg-1")))
            .await
            .unwrap();

        // Existing snapshot of 3 against a cap of 2 must not pass silently.
        let err = h
            .workflow
            .materialize(
                MaterializeRequest::reuse(SegmentId::new("seg-1")).with_max_contacts(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_SNAPSHOT_TOO_LARGE");
    }

    #[tokio::test]
    async fn concurrent_refreshes_of_one_version_serialize() {
        let h = harness(vec![cto("c-1")]).await;
        let workflow = Arc::new(h.workflow);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let workflow = workflow.clone();
            handles.push(tokio::spawn(async move {
                workflow
                    .materialize(MaterializeRequest::refresh(SegmentId::new("seg-1")))
                    .await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.count, 1);
        }

        // Every refresh ran, one at a time.
        assert_eq!(h.snapshots.replace_calls(), 4);
        let rows = h
            .snapshots
            .members(SegmentId::new("seg-1"), SegmentVersion::FIRST)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
