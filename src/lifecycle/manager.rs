//! Sanction orchestration: apply, lift, expire, rejoin reapply.
//!
//! Every operation that reads and then writes state for a key runs under that
//! key's lock. Events are fired after the lock is released so a listener may
//! call back into the manager.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use crate::core::clock::Clock;
use crate::core::config::SanctionsConfig;
use crate::core::errors::{Result, SwdError};
use crate::core::model::{CommunityId, LiftSource, Sanction, SanctionKey, whole_seconds_ceil};
use crate::events::{EventNotifier, SanctionEvent};
use crate::lifecycle::locks::KeyedLocks;
use crate::lifecycle::rejoin::RejoinOutcome;
use crate::lifecycle::scheduler::{ExpiryHandler, ExpiryTrigger, TimerHandle};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::{MembershipPlatform, Subject};
use crate::punishment::{Punisher, Punishment, PunishmentContext, PunishmentKind};
use crate::store::SanctionStore;

/// Result of a successful [`SanctionManager::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Restriction applied with no expiry; nothing persisted or scheduled.
    Indefinite,
    /// Restriction applied, persisted, and scheduled for expiry.
    Timed(Sanction),
}

impl ApplyOutcome {
    #[must_use]
    pub const fn expires_at(&self) -> Option<i64> {
        match self {
            Self::Indefinite => None,
            Self::Timed(record) => Some(record.expires_at),
        }
    }

    #[must_use]
    pub const fn record(&self) -> Option<&Sanction> {
        match self {
            Self::Indefinite => None,
            Self::Timed(record) => Some(record),
        }
    }
}

pub struct SanctionManager {
    store: Arc<dyn SanctionStore>,
    platform: Arc<dyn MembershipPlatform>,
    clock: Arc<dyn Clock>,
    timers: TimerHandle,
    notifier: Arc<EventNotifier>,
    config: SanctionsConfig,
    locks: KeyedLocks,
    logger: Option<ActivityLoggerHandle>,
}

impl SanctionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn SanctionStore>,
        platform: Arc<dyn MembershipPlatform>,
        clock: Arc<dyn Clock>,
        timers: TimerHandle,
        notifier: Arc<EventNotifier>,
        config: SanctionsConfig,
    ) -> Self {
        Self {
            store,
            platform,
            clock,
            timers,
            notifier,
            config,
            locks: KeyedLocks::new(),
            logger: None,
        }
    }

    #[must_use]
    pub fn with_activity_log(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    // ──────────────────── apply ────────────────────

    /// Restrict `subject` for `duration`; zero means indefinite.
    ///
    /// Fails with [`SwdError::AlreadyRestricted`] (and fires
    /// `sanction_violated_on_apply`) if the platform already shows the
    /// restriction. Platform errors propagate unchanged.
    pub fn apply(
        &self,
        subject: &Subject,
        reason: Option<&str>,
        duration: Duration,
    ) -> Result<ApplyOutcome> {
        let key = subject.key();
        let reason = reason.map_or_else(|| self.config.default_reason.clone(), str::to_string);

        let outcome = {
            let _guard = self.locks.lock(key);
            self.apply_locked(subject, &reason, duration)
        };

        match &outcome {
            Ok(applied) => self.log(ActivityEvent::SanctionApplied {
                key,
                reason,
                expires_at: applied.expires_at(),
            }),
            Err(err) if err.is_already_restricted() => {
                self.log(ActivityEvent::ApplyRejected {
                    key,
                    error_code: err.code().to_string(),
                    error_message: err.to_string(),
                });
                self.notifier.fire(&SanctionEvent::SanctionViolatedOnApply {
                    subject: subject.clone(),
                    reason,
                    duration_secs: whole_seconds_ceil(duration),
                });
            }
            Err(_) => {}
        }
        outcome
    }

    fn apply_locked(
        &self,
        subject: &Subject,
        reason: &str,
        duration: Duration,
    ) -> Result<ApplyOutcome> {
        let key = subject.key();
        if self.platform.has_restriction(subject)? {
            return Err(SwdError::AlreadyRestricted {
                community_id: key.community_id.0,
                subject_id: key.subject_id.0,
            });
        }

        let record = if duration.is_zero() {
            None
        } else {
            Some(Sanction::bounded(key, self.clock.now(), duration, reason)?)
        };

        self.platform.apply_restriction(subject, reason)?;

        let Some(record) = record else {
            return Ok(ApplyOutcome::Indefinite);
        };
        self.store.insert(&record)?;
        self.timers.arm(key, record.expires_at, &record.reason);
        Ok(ApplyOutcome::Timed(record))
    }

    // ──────────────────── lift ────────────────────

    /// Remove any sanction on `subject`. Returns whether the platform
    /// restriction was removed; `false` means there was nothing to remove.
    ///
    /// Does not fire `sanction_lifted`; that event belongs to expiry.
    pub fn lift(&self, subject: &Subject) -> Result<bool> {
        let key = subject.key();
        let removed = {
            let _guard = self.locks.lock(key);
            self.lift_locked(subject)?
        };
        self.log(ActivityEvent::SanctionLifted {
            key,
            source: None,
            removed,
        });
        Ok(removed)
    }

    fn lift_locked(&self, subject: &Subject) -> Result<bool> {
        let key = subject.key();
        self.timers.cancel(&key);
        self.store.delete(&key)?;
        if !self.platform.has_restriction(subject)? {
            return Ok(false);
        }
        self.platform.remove_restriction(subject)?;
        Ok(true)
    }

    // ──────────────────── expiry ────────────────────

    /// Lift the sanction named by `trigger` if it is still the one on record
    /// and is due. Fires `sanction_lifted` when the restriction was removed.
    pub fn expire(&self, trigger: &ExpiryTrigger) -> Result<bool> {
        let key = trigger.key;
        let (removed, record, subject) = {
            let _guard = self.locks.lock(key);
            let Some(record) = self.store.fetch(&key)? else {
                return Ok(false);
            };
            if record.expires_at != trigger.expires_at {
                // Superseded by a newer sanction on the same key.
                return Ok(false);
            }
            if record.is_active_at(self.clock.now().timestamp()) {
                self.timers.arm(key, record.expires_at, &record.reason);
                return Ok(false);
            }

            let subject = match &trigger.subject {
                Some(subject) => subject.clone(),
                None => self.resolve(key)?,
            };
            let removed = self.lift_locked(&subject)?;
            (removed, record, subject)
        };

        self.log(ActivityEvent::SanctionLifted {
            key,
            source: Some(trigger.source),
            removed,
        });
        if removed {
            self.notifier.fire(&SanctionEvent::SanctionLifted {
                subject,
                reason: record.reason,
                source: trigger.source,
            });
        }
        Ok(removed)
    }

    fn resolve(&self, key: SanctionKey) -> Result<Subject> {
        let community = self
            .platform
            .resolve_community(key.community_id)?
            .ok_or(SwdError::NotFound {
                what: "community",
                id: key.community_id.0,
            })?;
        self.platform
            .resolve_subject(&community, key.subject_id)?
            .ok_or(SwdError::NotFound {
                what: "subject",
                id: key.subject_id.0,
            })
    }

    /// Arm timers for every persisted sanction that is still in force.
    /// Due records are left for the sweep. Returns the number armed.
    pub fn restore_timers(&self) -> Result<usize> {
        let now = self.clock.now().timestamp();
        let mut armed = 0;
        for record in self.store.list(None)? {
            if record.is_active_at(now) {
                self.timers
                    .arm(record.key(), record.expires_at, &record.reason);
                armed += 1;
            }
        }
        Ok(armed)
    }

    // ──────────────────── rejoin ────────────────────

    /// Put the restriction back on a returning subject whose sanction is
    /// still in force. Creates no record and fires no event.
    pub fn reapply_if_active(&self, subject: &Subject) -> Result<RejoinOutcome> {
        let key = subject.key();
        let record = {
            let _guard = self.locks.lock(key);
            let now = self.clock.now().timestamp();
            let Some(record) = self.store.select_active_for(&key, now)? else {
                return Ok(RejoinOutcome::NoActiveSanction);
            };
            if self.platform.has_restriction(subject)? {
                return Ok(RejoinOutcome::AlreadyRestricted);
            }
            self.platform.apply_restriction(subject, &record.reason)?;
            if self.timers.armed(&key) != Some(record.expires_at) {
                self.timers.arm(key, record.expires_at, &record.reason);
            }
            record
        };

        self.log(ActivityEvent::SanctionReapplied {
            key,
            reason: record.reason.clone(),
            expires_at: record.expires_at,
        });
        Ok(RejoinOutcome::Reapplied(record))
    }

    // ──────────────────── queries ────────────────────

    /// The sanction on `key` if it is still in force.
    pub fn active_sanction(&self, key: &SanctionKey) -> Result<Option<Sanction>> {
        self.store
            .select_active_for(key, self.clock.now().timestamp())
    }

    /// Persisted sanctions that are due, soonest first.
    pub fn expired_sanctions(&self) -> Result<Vec<Sanction>> {
        self.store.select_expired(self.clock.now().timestamp())
    }

    /// All persisted sanctions, optionally for one community.
    pub fn sanctions(&self, community: Option<CommunityId>) -> Result<Vec<Sanction>> {
        self.store.list(community)
    }

    /// Whether the platform currently shows the restriction on `subject`.
    pub fn is_restricted(&self, subject: &Subject) -> Result<bool> {
        Ok(self.platform.has_restriction(subject)?)
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

impl ExpiryHandler for SanctionManager {
    fn expire(&self, trigger: &ExpiryTrigger) -> Result<bool> {
        Self::expire(self, trigger)
    }
}

impl Punisher for SanctionManager {
    fn kind(&self) -> PunishmentKind {
        PunishmentKind::Mute
    }

    fn punish(
        &self,
        ctx: &PunishmentContext,
        subject: &Subject,
        punishment: &Punishment,
    ) -> Result<()> {
        if punishment.kind != PunishmentKind::Mute {
            return Err(SwdError::Runtime {
                details: format!(
                    "mute handler cannot carry out {:?} punishment",
                    punishment.kind
                ),
            });
        }
        let duration = punishment.duration.unwrap_or(Duration::ZERO);
        let outcome = self.apply(subject, punishment.reason.as_deref(), duration)?;
        self.notifier.fire(&SanctionEvent::SanctionPunished {
            context: ctx.clone(),
            subject: subject.clone(),
            punishment: punishment.clone(),
            expires_at: outcome.expires_at(),
        });
        Ok(())
    }
}
