//! # Outreach Workflow
//!
//! The two orchestration layers of the consistency core:
//!
//! - [`snapshot`]: the single entry point for materializing segment
//!   snapshots. Guarantees every campaign/draft-generation step reads a
//!   stable, intentional `(version, count)` membership set.
//! - [`ingest`]: idempotent ingestion of canonical provider events with
//!   storage-level dedup.
//!
//! Both are written against the `outreach-core` storage traits and hold
//! their dependencies as `Arc<dyn Trait>`, so production (Postgres) and
//! test (in-memory) wirings are interchangeable.

pub mod ingest;
pub mod snapshot;

pub use ingest::{EventInput, IngestError, IngestOptions, IngestOutcome, IngestPipeline};
pub use snapshot::{
    DEFAULT_MAX_CONTACTS, MaterializeRequest, SnapshotHandle, SnapshotMode, SnapshotWorkflow,
    WorkflowError,
};
