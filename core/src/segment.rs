//! Segments and snapshot membership types.
//!
//! A [`Segment`] is a named audience selector: a validated clause list plus
//! a version counter. A snapshot freezes the members matching that filter at
//! capture time under one `(segment, version)` key; the frozen rows are the
//! only membership downstream consumers may read.

use crate::filter::ClauseList;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for [`SegmentId`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid segment ID: {0}")]
pub struct ParseSegmentIdError(String);

/// Unique identifier for a segment.
///
/// A newtype wrapper around `String` so segment ids cannot be confused with
/// contact ids or other plain strings in function signatures.
///
/// `FromStr` validates (rejects empty input); `new()` and `From` trust the
/// caller and are meant for application-controlled data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(String);

impl SegmentId {
    /// Create a new `SegmentId` from a trusted string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SegmentId {
    type Err = ParseSegmentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseSegmentIdError("Segment ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for SegmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SegmentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SegmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A segment's version counter.
///
/// Versions start at 1 and only move forward. Every snapshot is scoped to
/// exactly one version; bumping the version gives downstream consumers a
/// fresh, independent membership set without touching older ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentVersion(i64);

impl SegmentVersion {
    /// The first version of any segment.
    pub const FIRST: Self = Self(1);

    /// Create a version with the given value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw version number.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SegmentVersion {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<SegmentVersion> for i64 {
    fn from(version: SegmentVersion) -> Self {
        version.0
    }
}

/// A named, filter-defined audience selector.
///
/// After creation the version counter is the only field the core mutates,
/// and it is owned exclusively by the snapshot workflow through
/// [`SegmentStore::bump_version`](crate::store::SegmentStore::bump_version).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Segment {
    /// Unique id.
    pub id: SegmentId,
    /// Human-readable name.
    pub name: String,
    /// BCP-47-ish locale tag used by draft generation downstream.
    pub locale: String,
    /// The validated filter selecting this segment's audience.
    pub clauses: ClauseList,
    /// Current version counter (≥ 1).
    pub version: SegmentVersion,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Optional creator attribution.
    pub created_by: Option<String>,
}

/// Contact attributes frozen into a snapshot row at capture time.
///
/// Later edits to the live contact or company records must not leak into an
/// already-captured snapshot, so everything draft generation needs is copied
/// here verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedAttributes {
    /// Contact full name.
    pub name: Option<String>,
    /// Contact email address.
    pub email: Option<String>,
    /// Contact position/title.
    pub position: Option<String>,
    /// Short summary of the contact's company.
    pub company_summary: Option<String>,
}

/// One row of snapshot membership.
///
/// Uniqueness key: `(segment_id, segment_version, contact_id)`. Rows for a
/// given key pair are replaced wholesale on refresh, never patched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMember {
    /// The segment this row belongs to.
    pub segment_id: SegmentId,
    /// The snapshot version this row belongs to.
    pub segment_version: SegmentVersion,
    /// The captured contact.
    pub contact_id: String,
    /// The contact's company, when known.
    pub company_id: Option<String>,
    /// Attributes frozen at capture time.
    pub captured: CapturedAttributes,
}

/// A live candidate produced by filter evaluation, prior to being frozen
/// into a [`SnapshotMember`].
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateMember {
    /// Contact id in the live store.
    pub contact_id: String,
    /// Company id in the live store, when the contact has one.
    pub company_id: Option<String>,
    /// Attributes to freeze if this candidate is captured.
    pub captured: CapturedAttributes,
}

impl CandidateMember {
    /// Freeze this candidate into a snapshot row for the given key.
    #[must_use]
    pub fn into_member(self, segment_id: SegmentId, version: SegmentVersion) -> SnapshotMember {
        SnapshotMember {
            segment_id,
            segment_version: version,
            contact_id: self.contact_id,
            company_id: self.company_id,
            captured: self.captured,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_parse_rejects_empty() {
        assert!("".parse::<SegmentId>().is_err());
        let id: SegmentId = "seg-1".parse().unwrap();
        assert_eq!(id.as_str(), "seg-1");
    }

    #[test]
    fn version_starts_at_one_and_increments() {
        assert_eq!(SegmentVersion::FIRST.value(), 1);
        assert_eq!(SegmentVersion::FIRST.next(), SegmentVersion::new(2));
    }

    #[test]
    fn version_ordering() {
        assert!(SegmentVersion::new(1) < SegmentVersion::new(2));
    }

    #[test]
    fn candidate_freezes_into_member() {
        let candidate = CandidateMember {
            contact_id: "c-1".to_string(),
            company_id: Some("co-1".to_string()),
            captured: CapturedAttributes {
                name: Some("Ada".to_string()),
                email: Some("ada@example.com".to_string()),
                position: Some("CTO".to_string()),
                company_summary: Some("Example GmbH, 120 people".to_string()),
            },
        };

        let member = candidate.into_member(SegmentId::new("seg-1"), SegmentVersion::FIRST);
        assert_eq!(member.segment_id, SegmentId::new("seg-1"));
        assert_eq!(member.segment_version, SegmentVersion::FIRST);
        assert_eq!(member.contact_id, "c-1");
        assert_eq!(member.captured.position.as_deref(), Some("CTO"));
    }
}
