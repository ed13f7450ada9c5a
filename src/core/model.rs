//! Sanction record model: identifiers, keys, and the persisted record.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SwdError};

/// Placeholder reason recorded when the caller supplies none.
pub const DEFAULT_REASON: &str = "No reason provided.";

/// Identifier of a community (the scope a sanction applies in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommunityId(pub u64);

/// Identifier of a restricted subject within a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u64);

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `(community, subject)` pair a sanction record is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SanctionKey {
    pub community_id: CommunityId,
    pub subject_id: SubjectId,
}

impl SanctionKey {
    #[must_use]
    pub const fn new(community_id: CommunityId, subject_id: SubjectId) -> Self {
        Self {
            community_id,
            subject_id,
        }
    }
}

impl fmt::Display for SanctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.community_id, self.subject_id)
    }
}

/// What caused an expiry-driven lift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiftSource {
    /// The inline timer armed at apply time.
    Timer,
    /// The periodic recovery sweep.
    Sweep,
}

impl LiftSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Sweep => "sweep",
        }
    }
}

impl fmt::Display for LiftSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, bounded-duration sanction.
///
/// Timestamps are unix seconds. Indefinite sanctions never become records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sanction {
    pub community_id: CommunityId,
    pub subject_id: SubjectId,
    pub imposed_at: i64,
    pub expires_at: i64,
    pub reason: String,
}

impl Sanction {
    /// Build a record imposed at `now` that lasts for `duration`.
    ///
    /// Sub-second remainders round up so the record never expires early.
    /// A zero duration has no expiry and is rejected.
    pub fn bounded(
        key: SanctionKey,
        now: DateTime<Utc>,
        duration: Duration,
        reason: impl Into<String>,
    ) -> Result<Self> {
        let secs = i64::try_from(whole_seconds_ceil(duration)).unwrap_or(i64::MAX);
        if secs == 0 {
            return Err(SwdError::InvalidRecord {
                details: format!("sanction for {key} has no expiry"),
            });
        }
        let imposed_at = now.timestamp();
        let record = Self {
            community_id: key.community_id,
            subject_id: key.subject_id,
            imposed_at,
            expires_at: imposed_at.saturating_add(secs),
            reason: reason.into(),
        };
        record.validate()?;
        Ok(record)
    }

    #[must_use]
    pub const fn key(&self) -> SanctionKey {
        SanctionKey::new(self.community_id, self.subject_id)
    }

    /// Check the persisted-record invariant `expires_at > imposed_at`.
    pub fn validate(&self) -> Result<()> {
        if self.expires_at <= self.imposed_at {
            return Err(SwdError::InvalidRecord {
                details: format!(
                    "{}: expires_at ({}) must be after imposed_at ({})",
                    self.key(),
                    self.expires_at,
                    self.imposed_at
                ),
            });
        }
        Ok(())
    }

    /// Whether the sanction is still in force at `now` (unix seconds).
    #[must_use]
    pub const fn is_active_at(&self, now: i64) -> bool {
        self.expires_at > now
    }

    /// Time left until expiry; zero once due.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let secs = self.expires_at.saturating_sub(now.timestamp());
        u64::try_from(secs).map_or(Duration::ZERO, Duration::from_secs)
    }
}

/// Whole seconds in `duration`, rounding any remainder up.
pub(crate) fn whole_seconds_ceil(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
