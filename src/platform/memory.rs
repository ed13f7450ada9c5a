//! In-memory membership platform: rosters, restriction flags, call counters,
//! failure injection, and a rejoin broadcast. Used by tests and local demos.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::core::model::{CommunityId, SanctionKey, SubjectId};
use crate::platform::{
    Community, MembershipPlatform, PlatformError, PlatformResult, RejoinNotice, Subject,
};

#[derive(Debug, Default)]
struct Roster {
    communities: BTreeMap<CommunityId, Community>,
    members: BTreeSet<SanctionKey>,
    restricted: BTreeMap<SanctionKey, String>,
    unreachable: BTreeSet<CommunityId>,
    apply_failures: VecDeque<PlatformError>,
    remove_failures: VecDeque<PlatformError>,
}

/// Platform double that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    roster: Mutex<Roster>,
    rejoin_subscribers: Mutex<Vec<Sender<RejoinNotice>>>,
    apply_calls: AtomicU64,
    remove_calls: AtomicU64,
}

impl InMemoryPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a community.
    pub fn add_community(&self, id: CommunityId, name: impl Into<String>) {
        self.roster.lock().communities.insert(
            id,
            Community {
                id,
                name: name.into(),
            },
        );
    }

    /// Forget a community entirely (members and restrictions included).
    pub fn remove_community(&self, id: CommunityId) {
        let mut roster = self.roster.lock();
        roster.communities.remove(&id);
        roster.members.retain(|k| k.community_id != id);
        roster.restricted.retain(|k, _| k.community_id != id);
    }

    /// Add a member to a community, registering the community if needed.
    pub fn add_member(&self, community_id: CommunityId, subject_id: SubjectId) -> Subject {
        let mut roster = self.roster.lock();
        roster
            .communities
            .entry(community_id)
            .or_insert_with(|| Community {
                id: community_id,
                name: format!("community-{community_id}"),
            });
        roster
            .members
            .insert(SanctionKey::new(community_id, subject_id));
        Subject::new(community_id, subject_id)
    }

    /// The member leaves; the platform drops any restriction they carried.
    pub fn leave(&self, key: SanctionKey) {
        let mut roster = self.roster.lock();
        roster.members.remove(&key);
        roster.restricted.remove(&key);
    }

    /// The member comes back and every rejoin subscriber is notified.
    pub fn rejoin(&self, key: SanctionKey) {
        self.roster.lock().members.insert(key);
        let notice = RejoinNotice {
            community_id: key.community_id,
            subject_id: key.subject_id,
        };
        self.rejoin_subscribers
            .lock()
            .retain(|tx| tx.send(notice).is_ok());
    }

    /// Make lookups for a community fail as if the platform were unreachable.
    pub fn set_unreachable(&self, id: CommunityId, unreachable: bool) {
        let mut roster = self.roster.lock();
        if unreachable {
            roster.unreachable.insert(id);
        } else {
            roster.unreachable.remove(&id);
        }
    }

    /// Fail the next `apply_restriction` call with `error`.
    pub fn fail_next_apply(&self, error: PlatformError) {
        self.roster.lock().apply_failures.push_back(error);
    }

    /// Fail the next `remove_restriction` call with `error`.
    pub fn fail_next_remove(&self, error: PlatformError) {
        self.roster.lock().remove_failures.push_back(error);
    }

    /// Restrict a subject directly, bypassing the engine (simulates drift).
    pub fn force_restriction(&self, key: SanctionKey, reason: &str) {
        self.roster
            .lock()
            .restricted
            .insert(key, reason.to_string());
    }

    #[must_use]
    pub fn is_restricted(&self, key: SanctionKey) -> bool {
        self.roster.lock().restricted.contains_key(&key)
    }

    /// Reason attached to the current restriction, if any.
    #[must_use]
    pub fn restriction_reason(&self, key: SanctionKey) -> Option<String> {
        self.roster.lock().restricted.get(&key).cloned()
    }

    /// Number of `apply_restriction` calls that took effect.
    #[must_use]
    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Number of `remove_restriction` calls that took effect.
    #[must_use]
    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::SeqCst)
    }
}

impl MembershipPlatform for InMemoryPlatform {
    fn has_restriction(&self, subject: &Subject) -> PlatformResult<bool> {
        Ok(self.roster.lock().restricted.contains_key(&subject.key()))
    }

    fn apply_restriction(&self, subject: &Subject, reason: &str) -> PlatformResult<()> {
        let mut roster = self.roster.lock();
        if let Some(err) = roster.apply_failures.pop_front() {
            return Err(err);
        }
        roster.restricted.insert(subject.key(), reason.to_string());
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_restriction(&self, subject: &Subject) -> PlatformResult<()> {
        let mut roster = self.roster.lock();
        if let Some(err) = roster.remove_failures.pop_front() {
            return Err(err);
        }
        roster.restricted.remove(&subject.key());
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resolve_community(&self, id: CommunityId) -> PlatformResult<Option<Community>> {
        let roster = self.roster.lock();
        if roster.unreachable.contains(&id) {
            return Err(PlatformError::unavailable(format!(
                "community {id} unreachable"
            )));
        }
        Ok(roster.communities.get(&id).cloned())
    }

    fn resolve_subject(
        &self,
        community: &Community,
        id: SubjectId,
    ) -> PlatformResult<Option<Subject>> {
        let key = SanctionKey::new(community.id, id);
        let roster = self.roster.lock();
        Ok(roster
            .members
            .contains(&key)
            .then(|| Subject::new(community.id, id)))
    }

    fn subscribe_rejoins(&self) -> Receiver<RejoinNotice> {
        let (tx, rx) = unbounded();
        self.rejoin_subscribers.lock().push(tx);
        rx
    }
}
