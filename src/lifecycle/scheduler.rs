//! Two-tier expiry: inline timers armed at apply time, plus a periodic sweep
//! over the store that recovers anything the timers missed (restarts,
//! dropped triggers, platform outages).
//!
//! Threads:
//! - `swd-timer` sleeps until the next deadline (capped by the idle poll),
//!   takes due entries out of the timer queue and hands them to dispatch.
//! - `swd-expiry` receives triggers on a bounded channel and calls the
//!   [`ExpiryHandler`], keeping slow platform calls off the timer thread.
//! - `swd-sweep` waits for host readiness, then runs a cycle immediately and
//!   every `sweep_interval_secs` until shutdown.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use parking_lot::Mutex;

use crate::core::clock::Clock;
use crate::core::config::SchedulerConfig;
use crate::core::errors::{Result, SwdError};
use crate::core::model::{LiftSource, Sanction, SanctionKey};
use crate::daemon::signals::HostSignals;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::{MembershipPlatform, Subject, resolve_key};
use crate::store::SanctionStore;

// ──────────────────── triggers & handler ────────────────────

/// A request to expire the sanction for `key` if it still ends at `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryTrigger {
    pub key: SanctionKey,
    pub expires_at: i64,
    pub reason: String,
    pub source: LiftSource,
    /// Subject already resolved by the caller, if any.
    pub subject: Option<Subject>,
}

impl ExpiryTrigger {
    /// Trigger for a persisted record found by the sweep.
    #[must_use]
    pub fn from_record(record: &Sanction, source: LiftSource) -> Self {
        Self {
            key: record.key(),
            expires_at: record.expires_at,
            reason: record.reason.clone(),
            source,
            subject: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }
}

/// Receiver of expiry triggers. Implemented by the sanction manager.
///
/// Must be idempotent: a trigger for a record that is gone, or that was
/// replaced by a newer sanction, is a no-op returning `Ok(false)`.
pub trait ExpiryHandler: Send + Sync {
    /// Returns whether the platform restriction was removed.
    fn expire(&self, trigger: &ExpiryTrigger) -> Result<bool>;
}

// ──────────────────── timer queue ────────────────────

#[derive(Debug, Clone)]
struct TimerEntry {
    expires_at: i64,
    reason: String,
}

#[derive(Debug, Default)]
struct TimerQueue {
    entries: HashMap<SanctionKey, TimerEntry>,
    deadlines: BTreeSet<(i64, SanctionKey)>,
}

impl TimerQueue {
    fn remove(&mut self, key: &SanctionKey) -> Option<TimerEntry> {
        let entry = self.entries.remove(key)?;
        self.deadlines.remove(&(entry.expires_at, *key));
        Some(entry)
    }
}

/// Cloneable handle for arming and cancelling expiry timers.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    queue: Arc<Mutex<TimerQueue>>,
    wake: Sender<()>,
}

impl TimerHandle {
    /// Schedule expiry of `key` at `expires_at`, replacing any earlier timer.
    pub fn arm(&self, key: SanctionKey, expires_at: i64, reason: &str) {
        {
            let mut queue = self.queue.lock();
            queue.remove(&key);
            queue.entries.insert(
                key,
                TimerEntry {
                    expires_at,
                    reason: reason.to_string(),
                },
            );
            queue.deadlines.insert((expires_at, key));
        }
        self.nudge();
    }

    /// Drop the timer for `key`. Returns whether one was armed.
    pub fn cancel(&self, key: &SanctionKey) -> bool {
        let removed = self.queue.lock().remove(key).is_some();
        if removed {
            self.nudge();
        }
        removed
    }

    /// Deadline armed for `key`, if any.
    #[must_use]
    pub fn armed(&self, key: &SanctionKey) -> Option<i64> {
        self.queue.lock().entries.get(key).map(|e| e.expires_at)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<i64> {
        self.queue.lock().deadlines.first().map(|(at, _)| *at)
    }

    /// Remove and return every timer due at `now`, soonest first.
    #[must_use]
    pub fn take_due(&self, now: i64) -> Vec<ExpiryTrigger> {
        let mut queue = self.queue.lock();
        let mut due = Vec::new();
        while let Some(&(at, key)) = queue.deadlines.first() {
            if at > now {
                break;
            }
            if let Some(entry) = queue.remove(&key) {
                due.push(ExpiryTrigger {
                    key,
                    expires_at: entry.expires_at,
                    reason: entry.reason,
                    source: LiftSource::Timer,
                    subject: None,
                });
            }
        }
        due
    }

    fn nudge(&self) {
        // Full means a wake-up is already pending.
        if let Err(TrySendError::Disconnected(())) = self.wake.try_send(()) {
            // Timer thread gone (shutdown); nothing to wake.
        }
    }
}

/// Owner of the timer queue and its wake channel.
///
/// Hand `handle()` clones to the manager, then give the `ExpiryTimers` to
/// [`SanctionScheduler::new`].
#[derive(Debug)]
pub struct ExpiryTimers {
    handle: TimerHandle,
    wake_rx: Receiver<()>,
}

impl Default for ExpiryTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiryTimers {
    #[must_use]
    pub fn new() -> Self {
        let (wake, wake_rx) = bounded(1);
        Self {
            handle: TimerHandle {
                queue: Arc::new(Mutex::new(TimerQueue::default())),
                wake,
            },
            wake_rx,
        }
    }

    #[must_use]
    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }
}

// ──────────────────── sweep report ────────────────────

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due records read from the store.
    pub examined: usize,
    /// Records whose restriction was removed from the platform.
    pub lifted: usize,
    /// Records that were gone, superseded, or already unrestricted.
    pub already_gone: usize,
    /// Records left in place because their community or subject did not resolve.
    pub skipped: usize,
    /// Records (or the store query) that failed with an error.
    pub failed: usize,
    /// Shutdown arrived before every record was visited.
    pub interrupted: bool,
}

// ──────────────────── scheduler ────────────────────

/// Drives expiry for one store. Run at most one scheduler per store.
pub struct SanctionScheduler {
    store: Arc<dyn SanctionStore>,
    platform: Arc<dyn MembershipPlatform>,
    clock: Arc<dyn Clock>,
    timers: ExpiryTimers,
    config: SchedulerConfig,
    logger: Option<ActivityLoggerHandle>,
}

/// Join handles for the scheduler threads.
pub struct SchedulerThreads {
    timer: thread::JoinHandle<()>,
    dispatch: thread::JoinHandle<()>,
    sweep: thread::JoinHandle<()>,
}

impl SchedulerThreads {
    /// Wait for all scheduler threads. Returns `false` if any panicked.
    pub fn join(self) -> bool {
        let timer_ok = self.timer.join().is_ok();
        let dispatch_ok = self.dispatch.join().is_ok();
        let sweep_ok = self.sweep.join().is_ok();
        timer_ok && dispatch_ok && sweep_ok
    }
}

impl SanctionScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn SanctionStore>,
        platform: Arc<dyn MembershipPlatform>,
        clock: Arc<dyn Clock>,
        timers: ExpiryTimers,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            platform,
            clock,
            timers,
            config,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_activity_log(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn timer_handle(&self) -> TimerHandle {
        self.timers.handle()
    }

    /// Deliver every timer due at the clock's current time to `handler`.
    /// Returns the number of triggers delivered.
    pub fn fire_due(&self, handler: &dyn ExpiryHandler) -> usize {
        let due = self.timers.handle.take_due(self.clock.now().timestamp());
        let count = due.len();
        for trigger in &due {
            dispatch_one(handler, trigger, self.logger.as_ref());
        }
        count
    }

    /// Run one sweep cycle. `shutdown` is checked between records.
    pub fn run_sweep_once(
        &self,
        handler: &dyn ExpiryHandler,
        shutdown: Option<&Receiver<()>>,
    ) -> SweepReport {
        let started = Instant::now();
        let now = self.clock.now().timestamp();
        let mut report = SweepReport::default();

        let due = match self.store.select_expired(now) {
            Ok(due) => due,
            Err(e) => {
                eprintln!("[SWD-SWEEP] failed to read expired sanctions: {e}");
                self.log(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("sweep query failed: {e}"),
                });
                report.failed += 1;
                return report;
            }
        };

        for record in &due {
            if shutdown.is_some_and(is_disconnected) {
                report.interrupted = true;
                break;
            }
            report.examined += 1;

            let key = record.key();
            let subject = match resolve_key(self.platform.as_ref(), key) {
                Ok(subject) => subject,
                Err(details) => {
                    eprintln!("[SWD-SWEEP] skipping {key}: {details}");
                    self.log(ActivityEvent::SweepSkipped { key, details });
                    report.skipped += 1;
                    continue;
                }
            };

            let trigger = ExpiryTrigger::from_record(record, LiftSource::Sweep).with_subject(subject);
            match handler.expire(&trigger) {
                Ok(true) => report.lifted += 1,
                Ok(false) => report.already_gone += 1,
                Err(e) => {
                    eprintln!("[SWD-SWEEP] failed to expire {key}: {e}");
                    self.log(ActivityEvent::Error {
                        code: e.code().to_string(),
                        message: format!("sweep expiry of {key} failed: {e}"),
                    });
                    report.failed += 1;
                }
            }
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.log(ActivityEvent::SweepCompleted {
            examined: report.examined,
            lifted: report.lifted,
            skipped: report.skipped,
            failed: report.failed,
            duration_ms,
        });
        report
    }

    /// Spawn the timer, dispatch and sweep threads.
    ///
    /// They stop when `signals` reports shutdown; join them with
    /// [`SchedulerThreads::join`].
    pub fn start(
        self,
        handler: Arc<dyn ExpiryHandler>,
        signals: &HostSignals,
    ) -> Result<SchedulerThreads> {
        let this = Arc::new(self);
        let (dispatch_tx, dispatch_rx) =
            bounded::<ExpiryTrigger>(this.config.dispatch_channel_capacity);

        let timer = {
            let this = Arc::clone(&this);
            let shutdown = signals.shutdown_receiver();
            spawn_named("swd-timer", move || this.timer_loop(&dispatch_tx, &shutdown))?
        };

        let dispatch = {
            let handler = Arc::clone(&handler);
            let logger = this.logger.clone();
            spawn_named("swd-expiry", move || {
                for trigger in &dispatch_rx {
                    dispatch_one(handler.as_ref(), &trigger, logger.as_ref());
                }
            })?
        };

        let sweep = {
            let this = Arc::clone(&this);
            let signals = signals.clone();
            spawn_named("swd-sweep", move || this.sweep_loop(handler.as_ref(), &signals))?
        };

        Ok(SchedulerThreads {
            timer,
            dispatch,
            sweep,
        })
    }

    fn timer_loop(&self, dispatch_tx: &Sender<ExpiryTrigger>, shutdown: &Receiver<()>) {
        let idle = self.config.timer_idle_poll();
        loop {
            let now = self.clock.now();
            for trigger in self.timers.handle.take_due(now.timestamp()) {
                select! {
                    send(dispatch_tx, trigger) -> res => {
                        if res.is_err() {
                            eprintln!("[SWD-TIMER] expiry dispatch closed, stopping");
                            return;
                        }
                    }
                    recv(shutdown) -> _ => return,
                }
            }

            let wait = self.timers.handle.next_deadline().map_or(idle, |deadline| {
                let ms = deadline
                    .saturating_mul(1_000)
                    .saturating_sub(now.timestamp_millis());
                u64::try_from(ms).map_or(Duration::ZERO, Duration::from_millis).min(idle)
            });

            select! {
                recv(self.timers.wake_rx) -> _ => {}
                recv(shutdown) -> _ => return,
                default(wait) => {}
            }
        }
    }

    fn sweep_loop(&self, handler: &dyn ExpiryHandler, signals: &HostSignals) {
        let ready = signals.ready_receiver();
        let shutdown = signals.shutdown_receiver();
        let sweep_now = signals.sweep_receiver();

        select! {
            recv(ready) -> _ => {}
            recv(shutdown) -> _ => return,
        }
        if signals.is_shutdown_requested() {
            return;
        }
        eprintln!(
            "[SWD-SWEEP] host ready, sweeping every {}s",
            self.config.sweep_interval_secs
        );

        loop {
            let report = self.run_sweep_once(handler, Some(&shutdown));
            if report.examined > 0 || report.failed > 0 {
                eprintln!(
                    "[SWD-SWEEP] examined={} lifted={} gone={} skipped={} failed={}",
                    report.examined,
                    report.lifted,
                    report.already_gone,
                    report.skipped,
                    report.failed
                );
            }
            if report.interrupted {
                return;
            }

            select! {
                recv(shutdown) -> _ => return,
                recv(sweep_now) -> _ => {}
                default(self.config.sweep_interval()) => {}
            }
        }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

fn dispatch_one(
    handler: &dyn ExpiryHandler,
    trigger: &ExpiryTrigger,
    logger: Option<&ActivityLoggerHandle>,
) {
    if let Err(e) = handler.expire(trigger) {
        // The record stays in the store; the next sweep retries it.
        eprintln!(
            "[SWD-TIMER] expiry of {} failed, leaving for sweep: {e}",
            trigger.key
        );
        if let Some(logger) = logger {
            logger.send(ActivityEvent::Error {
                code: e.code().to_string(),
                message: format!("timer expiry of {} failed: {e}", trigger.key),
            });
        }
    }
}

fn is_disconnected(rx: &Receiver<()>) -> bool {
    matches!(
        rx.try_recv(),
        Err(crossbeam_channel::TryRecvError::Disconnected)
    )
}

fn spawn_named<F>(name: &str, f: F) -> Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| SwdError::Runtime {
            details: format!("failed to spawn {name} thread: {e}"),
        })
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::model::{CommunityId, SubjectId};
    use crate::platform::memory::InMemoryPlatform;
    use crate::store::InMemorySanctionStore;

    fn key(s: u64) -> SanctionKey {
        SanctionKey::new(CommunityId(1), SubjectId(s))
    }

    fn record(s: u64, expires_at: i64) -> Sanction {
        Sanction {
            community_id: CommunityId(1),
            subject_id: SubjectId(s),
            imposed_at: 0,
            expires_at,
            reason: format!("r{s}"),
        }
    }

    /// Records triggers; deletes from the store so repeat triggers are no-ops.
    struct Recorder {
        store: Arc<InMemorySanctionStore>,
        seen: Mutex<Vec<ExpiryTrigger>>,
        fail: bool,
    }

    impl ExpiryHandler for Recorder {
        fn expire(&self, trigger: &ExpiryTrigger) -> Result<bool> {
            self.seen.lock().push(trigger.clone());
            if self.fail {
                return Err(SwdError::Sql {
                    context: "test",
                    details: "locked".to_string(),
                });
            }
            self.store.delete(&trigger.key)
        }
    }

    struct Fixture {
        store: Arc<InMemorySanctionStore>,
        platform: Arc<InMemoryPlatform>,
        clock: ManualClock,
        scheduler: SanctionScheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemorySanctionStore::new());
        let platform = Arc::new(InMemoryPlatform::new());
        let clock = ManualClock::at_unix(1_000);
        let scheduler = SanctionScheduler::new(
            store.clone(),
            platform.clone(),
            Arc::new(clock.clone()),
            ExpiryTimers::new(),
            SchedulerConfig::default(),
        );
        Fixture {
            store,
            platform,
            clock,
            scheduler,
        }
    }

    fn recorder(store: &Arc<InMemorySanctionStore>, fail: bool) -> Recorder {
        Recorder {
            store: Arc::clone(store),
            seen: Mutex::new(Vec::new()),
            fail,
        }
    }

    #[test]
    fn arm_replaces_previous_deadline() {
        let timers = ExpiryTimers::new();
        let handle = timers.handle();
        handle.arm(key(1), 100, "a");
        handle.arm(key(1), 200, "b");

        assert_eq!(handle.len(), 1);
        assert_eq!(handle.armed(&key(1)), Some(200));
        assert!(handle.take_due(150).is_empty());
        let due = handle.take_due(200);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].reason, "b");
    }

    #[test]
    fn cancel_removes_timer() {
        let handle = ExpiryTimers::new().handle();
        handle.arm(key(1), 100, "a");
        assert!(handle.cancel(&key(1)));
        assert!(!handle.cancel(&key(1)));
        assert!(handle.is_empty());
        assert!(handle.take_due(1_000).is_empty());
    }

    #[test]
    fn take_due_is_ordered_and_inclusive() {
        let handle = ExpiryTimers::new().handle();
        handle.arm(key(3), 30, "c");
        handle.arm(key(1), 10, "a");
        handle.arm(key(2), 20, "b");

        let due: Vec<i64> = handle.take_due(20).iter().map(|t| t.expires_at).collect();
        assert_eq!(due, vec![10, 20]);
        assert_eq!(handle.next_deadline(), Some(30));
    }

    #[test]
    fn fire_due_follows_the_clock() {
        let fx = fixture();
        let handler = recorder(&fx.store, false);
        fx.scheduler.timer_handle().arm(key(1), 1_060, "spam");

        assert_eq!(fx.scheduler.fire_due(&handler), 0);
        fx.clock.advance(Duration::from_secs(60));
        assert_eq!(fx.scheduler.fire_due(&handler), 1);
        assert_eq!(fx.scheduler.fire_due(&handler), 0);

        let seen = handler.seen.lock();
        assert_eq!(seen[0].source, LiftSource::Timer);
        assert_eq!(seen[0].expires_at, 1_060);
    }

    #[test]
    fn sweep_expires_due_records_with_resolved_subject() {
        let fx = fixture();
        fx.platform.add_member(CommunityId(1), SubjectId(1));
        fx.platform.add_member(CommunityId(1), SubjectId(2));
        fx.store.insert(&record(1, 900)).unwrap();
        fx.store.insert(&record(2, 5_000)).unwrap();
        let handler = recorder(&fx.store, false);

        let report = fx.scheduler.run_sweep_once(&handler, None);
        assert_eq!(report.examined, 1);
        assert_eq!(report.lifted, 1);

        let seen = handler.seen.lock();
        assert_eq!(seen[0].source, LiftSource::Sweep);
        assert_eq!(seen[0].subject.as_ref().map(Subject::key), Some(key(1)));
        assert!(fx.store.fetch(&key(2)).unwrap().is_some());
    }

    #[test]
    fn sweep_skips_unresolvable_records_without_deleting() {
        let fx = fixture();
        fx.store.insert(&record(1, 900)).unwrap();
        fx.platform.add_community(CommunityId(1), "one");
        let handler = recorder(&fx.store, false);

        let report = fx.scheduler.run_sweep_once(&handler, None);
        assert_eq!(report.skipped, 1);
        assert!(handler.seen.lock().is_empty());
        assert!(fx.store.fetch(&key(1)).unwrap().is_some());

        fx.platform.add_member(CommunityId(1), SubjectId(1));
        let report = fx.scheduler.run_sweep_once(&handler, None);
        assert_eq!(report.lifted, 1);
    }

    #[test]
    fn sweep_counts_failures_and_continues() {
        let fx = fixture();
        fx.platform.add_member(CommunityId(1), SubjectId(1));
        fx.platform.add_member(CommunityId(1), SubjectId(2));
        fx.store.insert(&record(1, 900)).unwrap();
        fx.store.insert(&record(2, 950)).unwrap();
        let handler = recorder(&fx.store, true);

        let report = fx.scheduler.run_sweep_once(&handler, None);
        assert_eq!(report.examined, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(handler.seen.lock().len(), 2);
    }

    #[test]
    fn sweep_stops_between_records_on_shutdown() {
        let fx = fixture();
        fx.platform.add_member(CommunityId(1), SubjectId(1));
        fx.store.insert(&record(1, 900)).unwrap();
        let signals = HostSignals::new();
        signals.request_shutdown();
        let handler = recorder(&fx.store, false);

        let report = fx
            .scheduler
            .run_sweep_once(&handler, Some(&signals.shutdown_receiver()));
        assert!(report.interrupted);
        assert_eq!(report.examined, 0);
    }

    #[test]
    fn threads_wait_for_readiness_and_stop_on_shutdown() {
        let store = Arc::new(InMemorySanctionStore::new());
        let platform = Arc::new(InMemoryPlatform::new());
        platform.add_member(CommunityId(1), SubjectId(1));
        store.insert(&record(1, 10)).unwrap();

        let config = SchedulerConfig {
            sweep_interval_secs: 3_600,
            timer_idle_poll_ms: 20,
            dispatch_channel_capacity: 4,
        };
        let scheduler = SanctionScheduler::new(
            store.clone(),
            platform,
            Arc::new(crate::core::clock::SystemClock),
            ExpiryTimers::new(),
            config,
        );
        let handler = Arc::new(recorder(&store, false));
        let signals = HostSignals::new();
        let threads = scheduler.start(handler.clone(), &signals).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(handler.seen.lock().is_empty(), "sweep must wait for readiness");

        signals.mark_ready();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.fetch(&key(1)).unwrap().is_some() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(store.fetch(&key(1)).unwrap().is_none());

        signals.request_shutdown();
        assert!(threads.join());
    }
}
