//! Sanction lifecycle events and the typed bus that delivers them.

#![allow(missing_docs)]

pub mod listeners;
pub mod notifier;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::model::{LiftSource, SanctionKey};
use crate::platform::Subject;
use crate::punishment::{Punishment, PunishmentContext};

pub use notifier::{EventNotifier, FireReport, SanctionListener, SubscriptionId};

/// The three event names a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SanctionLifted,
    SanctionViolatedOnApply,
    SanctionPunished,
}

impl EventKind {
    pub const ALL: [Self; 3] = [
        Self::SanctionLifted,
        Self::SanctionViolatedOnApply,
        Self::SanctionPunished,
    ];

    /// Stable wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SanctionLifted => "sanction_lifted",
            Self::SanctionViolatedOnApply => "sanction_violated_on_apply",
            Self::SanctionPunished => "sanction_punished",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity used by built-in listeners for min-level filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Notice,
    Warning,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Notice => write!(f, "notice"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A lifecycle event with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SanctionEvent {
    /// An expired sanction was removed from the platform.
    SanctionLifted {
        subject: Subject,
        reason: String,
        source: LiftSource,
    },
    /// Apply was refused because the subject already carried the restriction.
    SanctionViolatedOnApply {
        subject: Subject,
        reason: String,
        /// Requested duration in whole seconds; 0 is indefinite.
        duration_secs: u64,
    },
    /// A dispatched punishment was carried out as a mute.
    SanctionPunished {
        context: PunishmentContext,
        subject: Subject,
        punishment: Punishment,
        /// `None` when the mute is indefinite.
        expires_at: Option<i64>,
    },
}

impl SanctionEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::SanctionLifted { .. } => EventKind::SanctionLifted,
            Self::SanctionViolatedOnApply { .. } => EventKind::SanctionViolatedOnApply,
            Self::SanctionPunished { .. } => EventKind::SanctionPunished,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind().name()
    }

    #[must_use]
    pub const fn level(&self) -> EventLevel {
        match self {
            Self::SanctionLifted { .. } => EventLevel::Info,
            Self::SanctionPunished { .. } => EventLevel::Notice,
            Self::SanctionViolatedOnApply { .. } => EventLevel::Warning,
        }
    }

    /// The sanction key the event concerns.
    #[must_use]
    pub const fn key(&self) -> SanctionKey {
        match self {
            Self::SanctionLifted { subject, .. }
            | Self::SanctionViolatedOnApply { subject, .. }
            | Self::SanctionPunished { subject, .. } => subject.key(),
        }
    }

    /// Short human-readable summary line.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::SanctionLifted {
                subject,
                reason,
                source,
            } => format!(
                "Sanction on {subject} ({}) expired and was lifted by {source} ({reason})",
                subject.key()
            ),
            Self::SanctionViolatedOnApply {
                subject, reason, ..
            } => format!("Refused to sanction {subject}: already restricted ({reason})"),
            Self::SanctionPunished {
                context,
                subject,
                expires_at,
                ..
            } => match expires_at {
                Some(at) => format!(
                    "{subject} muted by {} via {} until {at}",
                    context.issued_by, context.origin
                ),
                None => format!(
                    "{subject} muted indefinitely by {} via {}",
                    context.issued_by, context.origin
                ),
            },
        }
    }
}
