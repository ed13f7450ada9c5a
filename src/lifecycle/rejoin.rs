//! Rejoin enforcement: a subject that leaves and comes back before its
//! sanction expires gets the restriction back.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, select};

use crate::core::errors::{Result, SwdError};
use crate::core::model::Sanction;
use crate::daemon::signals::HostSignals;
use crate::lifecycle::manager::SanctionManager;
use crate::platform::{MembershipPlatform, RejoinNotice, resolve_key};

/// What happened for one rejoin notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejoinOutcome {
    /// The restriction was put back; the record is unchanged.
    Reapplied(Sanction),
    /// The platform already showed the restriction.
    AlreadyRestricted,
    /// No sanction in force for this subject.
    NoActiveSanction,
    /// The community or subject could not be resolved.
    Unresolved,
}

pub struct RejoinGuard {
    manager: Arc<SanctionManager>,
    platform: Arc<dyn MembershipPlatform>,
}

impl RejoinGuard {
    #[must_use]
    pub fn new(manager: Arc<SanctionManager>, platform: Arc<dyn MembershipPlatform>) -> Self {
        Self { manager, platform }
    }

    /// Handle one notice synchronously.
    pub fn handle(&self, notice: RejoinNotice) -> Result<RejoinOutcome> {
        let subject = match resolve_key(self.platform.as_ref(), notice.key()) {
            Ok(subject) => subject,
            Err(details) => {
                eprintln!("[SWD-REJOIN] ignoring rejoin of {}: {details}", notice.key());
                return Ok(RejoinOutcome::Unresolved);
            }
        };
        self.manager.reapply_if_active(&subject)
    }

    /// Subscribe to the platform's rejoin stream and consume it on a
    /// `swd-rejoin` thread until shutdown or the stream closes.
    pub fn start(self, signals: &HostSignals) -> Result<thread::JoinHandle<()>> {
        let notices = self.platform.subscribe_rejoins();
        let shutdown = signals.shutdown_receiver();
        thread::Builder::new()
            .name("swd-rejoin".to_string())
            .spawn(move || self.run(&notices, &shutdown))
            .map_err(|e| SwdError::Runtime {
                details: format!("failed to spawn swd-rejoin thread: {e}"),
            })
    }

    fn run(&self, notices: &Receiver<RejoinNotice>, shutdown: &Receiver<()>) {
        loop {
            select! {
                recv(notices) -> msg => match msg {
                    Ok(notice) => match self.handle(notice) {
                        Ok(RejoinOutcome::Reapplied(record)) => {
                            eprintln!(
                                "[SWD-REJOIN] reapplied sanction on {} until {}",
                                record.key(),
                                record.expires_at
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            eprintln!("[SWD-REJOIN] reapply for {} failed: {e}", notice.key());
                        }
                    },
                    Err(_) => {
                        eprintln!("[SWD-REJOIN] rejoin stream closed, stopping");
                        return;
                    }
                },
                recv(shutdown) -> _ => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::config::SanctionsConfig;
    use crate::core::model::{CommunityId, SubjectId};
    use crate::events::EventNotifier;
    use crate::lifecycle::scheduler::ExpiryTimers;
    use crate::platform::memory::InMemoryPlatform;
    use crate::store::InMemorySanctionStore;
    use std::time::{Duration, Instant};

    fn guard() -> (Arc<InMemoryPlatform>, Arc<SanctionManager>, RejoinGuard) {
        let platform = Arc::new(InMemoryPlatform::new());
        let manager = Arc::new(SanctionManager::new(
            Arc::new(InMemorySanctionStore::new()),
            platform.clone(),
            Arc::new(ManualClock::at_unix(500)),
            ExpiryTimers::new().handle(),
            Arc::new(EventNotifier::new()),
            SanctionsConfig::default(),
        ));
        let guard = RejoinGuard::new(Arc::clone(&manager), platform.clone());
        (platform, manager, guard)
    }

    #[test]
    fn unknown_subject_is_unresolved() {
        let (_platform, _manager, guard) = guard();
        let notice = RejoinNotice {
            community_id: CommunityId(1),
            subject_id: SubjectId(1),
        };
        assert_eq!(guard.handle(notice).unwrap(), RejoinOutcome::Unresolved);
    }

    #[test]
    fn no_record_means_no_action() {
        let (platform, _manager, guard) = guard();
        let subject = platform.add_member(CommunityId(1), SubjectId(1));
        let notice = RejoinNotice {
            community_id: CommunityId(1),
            subject_id: SubjectId(1),
        };
        assert_eq!(
            guard.handle(notice).unwrap(),
            RejoinOutcome::NoActiveSanction
        );
        assert!(!platform.is_restricted(subject.key()));
    }

    #[test]
    fn thread_reapplies_on_rejoin_and_stops_on_shutdown() {
        let (platform, manager, guard) = guard();
        let subject = platform.add_member(CommunityId(1), SubjectId(1));
        manager
            .apply(&subject, Some("evasion"), Duration::from_secs(60))
            .unwrap();
        platform.leave(subject.key());

        let signals = HostSignals::new();
        let handle = guard.start(&signals).unwrap();
        platform.rejoin(subject.key());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !platform.is_restricted(subject.key()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(platform.is_restricted(subject.key()));
        assert_eq!(platform.apply_calls(), 2);

        signals.request_shutdown();
        handle.join().unwrap();
    }
}
