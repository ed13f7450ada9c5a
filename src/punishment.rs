//! Punishment dispatch port. A moderation framework routes each punishment
//! kind to a [`Punisher`]; the sanction manager handles [`PunishmentKind::Mute`].

#![allow(missing_docs)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::platform::Subject;

/// Kinds of punishment a dispatcher may route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishmentKind {
    Warn,
    Mute,
    Kick,
    Ban,
}

/// What the dispatcher asks a handler to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub kind: PunishmentKind,
    pub reason: Option<String>,
    /// `None` or zero means indefinite.
    pub duration: Option<Duration>,
}

impl Punishment {
    #[must_use]
    pub fn mute(reason: Option<String>, duration: Option<Duration>) -> Self {
        Self {
            kind: PunishmentKind::Mute,
            reason,
            duration,
        }
    }
}

/// Who triggered the punishment and where; passed through to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentContext {
    /// Identifier of the actor (moderator, automod rule) that issued it.
    pub issued_by: String,
    /// Free-form origin, e.g. the command or rule name.
    pub origin: String,
}

/// Handler for one punishment kind.
pub trait Punisher: Send + Sync {
    /// The kind this handler accepts.
    fn kind(&self) -> PunishmentKind;

    /// Carry out `punishment` against `subject`.
    ///
    /// Platform errors propagate unchanged so the dispatcher can report them.
    fn punish(
        &self,
        ctx: &PunishmentContext,
        subject: &Subject,
        punishment: &Punishment,
    ) -> Result<()>;
}
