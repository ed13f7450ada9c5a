//! Membership platform port: the external system that owns rosters and
//! actually enforces the restriction (role or permission assignment).

#![allow(missing_docs)]

pub mod memory;

use std::fmt;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::model::{CommunityId, SanctionKey, SubjectId};

/// A community as resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
}

/// A member of a community as resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub community_id: CommunityId,
    pub id: SubjectId,
    pub display_name: String,
}

impl Subject {
    #[must_use]
    pub fn new(community_id: CommunityId, id: SubjectId) -> Self {
        Self {
            community_id,
            id,
            display_name: format!("subject-{id}"),
        }
    }

    #[must_use]
    pub const fn key(&self) -> SanctionKey {
        SanctionKey::new(self.community_id, self.id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.key())
    }
}

/// A subject re-entered a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejoinNotice {
    pub community_id: CommunityId,
    pub subject_id: SubjectId,
}

impl RejoinNotice {
    #[must_use]
    pub const fn key(&self) -> SanctionKey {
        SanctionKey::new(self.community_id, self.subject_id)
    }
}

/// Broad class of a platform failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformErrorKind {
    /// Insufficient privilege to modify the restriction.
    Forbidden,
    /// The platform could not be reached or timed out.
    Unavailable,
    Other,
}

impl fmt::Display for PlatformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden => write!(f, "forbidden"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Error reported by a [`MembershipPlatform`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {details}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub details: String,
}

impl PlatformError {
    pub fn forbidden(details: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::Forbidden,
            details: details.into(),
        }
    }

    pub fn unavailable(details: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::Unavailable,
            details: details.into(),
        }
    }

    pub fn other(details: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::Other,
            details: details.into(),
        }
    }
}

/// Result of a platform call.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Narrow view of the membership platform used by the sanction engine.
///
/// Implementations must be safe to call from the scheduler, rejoin, and
/// caller threads at once. Nothing here is retried by the engine.
pub trait MembershipPlatform: Send + Sync {
    /// Whether the subject currently carries the restriction.
    fn has_restriction(&self, subject: &Subject) -> PlatformResult<bool>;

    /// Put the restriction on the subject.
    fn apply_restriction(&self, subject: &Subject, reason: &str) -> PlatformResult<()>;

    /// Take the restriction off the subject.
    fn remove_restriction(&self, subject: &Subject) -> PlatformResult<()>;

    /// Look up a community; `Ok(None)` when it is unknown.
    fn resolve_community(&self, id: CommunityId) -> PlatformResult<Option<Community>>;

    /// Look up a member of a community; `Ok(None)` when they are not present.
    fn resolve_subject(
        &self,
        community: &Community,
        id: SubjectId,
    ) -> PlatformResult<Option<Subject>>;

    /// Stream of rejoin notifications. Each call yields a new subscription.
    fn subscribe_rejoins(&self) -> Receiver<RejoinNotice>;
}

/// Resolve `key` to a subject, treating lookup failures as "not resolvable now".
///
/// Returns `Err` only to carry the reason the key was skipped.
pub fn resolve_key(
    platform: &dyn MembershipPlatform,
    key: SanctionKey,
) -> std::result::Result<Subject, String> {
    let community = match platform.resolve_community(key.community_id) {
        Ok(Some(c)) => c,
        Ok(None) => return Err(format!("community {} not found", key.community_id)),
        Err(e) => return Err(format!("community {} lookup failed: {e}", key.community_id)),
    };
    match platform.resolve_subject(&community, key.subject_id) {
        Ok(Some(s)) => Ok(s),
        Ok(None) => Err(format!(
            "subject {} not found in community {}",
            key.subject_id, key.community_id
        )),
        Err(e) => Err(format!("subject {} lookup failed: {e}", key.subject_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_error_display_includes_kind() {
        let err = PlatformError::forbidden("missing manage-roles");
        assert_eq!(err.to_string(), "forbidden: missing manage-roles");
    }

    #[test]
    fn subject_key_matches_ids() {
        let subject = Subject::new(CommunityId(3), SubjectId(9));
        assert_eq!(
            subject.key(),
            SanctionKey::new(CommunityId(3), SubjectId(9))
        );
        assert!(subject.to_string().contains("3/9"));
    }
}
