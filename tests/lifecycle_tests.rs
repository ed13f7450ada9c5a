//! Lifecycle scenarios across manager, scheduler, rejoin guard and notifier,
//! driven by a manual clock so every expiry step is deterministic.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sanction_warden::core::config::{SanctionsConfig, SchedulerConfig};
use sanction_warden::prelude::*;

struct Engine {
    store: Arc<dyn SanctionStore>,
    platform: Arc<InMemoryPlatform>,
    clock: ManualClock,
    manager: Arc<SanctionManager>,
    scheduler: SanctionScheduler,
    events: Arc<Mutex<Vec<SanctionEvent>>>,
}

fn engine_with_store(store: Arc<dyn SanctionStore>) -> Engine {
    let platform = Arc::new(InMemoryPlatform::new());
    let clock = ManualClock::at_unix(1_700_000_000);
    let notifier = Arc::new(EventNotifier::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::ALL {
        let events = Arc::clone(&events);
        notifier.subscribe_fn(kind, move |event| {
            events.lock().push(event.clone());
            Ok(())
        });
    }

    let timers = ExpiryTimers::new();
    let manager = Arc::new(SanctionManager::new(
        Arc::clone(&store),
        platform.clone(),
        Arc::new(clock.clone()),
        timers.handle(),
        notifier,
        SanctionsConfig::default(),
    ));
    let scheduler = SanctionScheduler::new(
        Arc::clone(&store),
        platform.clone(),
        Arc::new(clock.clone()),
        timers,
        SchedulerConfig::default(),
    );
    Engine {
        store,
        platform,
        clock,
        manager,
        scheduler,
        events,
    }
}

fn engine() -> Engine {
    engine_with_store(Arc::new(InMemorySanctionStore::new()))
}

fn lifted_count(engine: &Engine) -> usize {
    engine
        .events
        .lock()
        .iter()
        .filter(|e| e.kind() == EventKind::SanctionLifted)
        .count()
}

#[test]
fn expiry_round_trip_fires_one_lifted_event() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(10), SubjectId(20));

    let outcome = engine
        .manager
        .apply(&subject, Some("spam"), Duration::from_secs(90))
        .unwrap();
    let record = outcome.record().unwrap().clone();
    assert_eq!(record.expires_at, record.imposed_at + 90);

    engine.clock.advance(Duration::from_secs(89));
    assert_eq!(engine.scheduler.fire_due(engine.manager.as_ref()), 0);
    assert!(engine.platform.is_restricted(subject.key()));

    engine.clock.advance(Duration::from_secs(1));
    assert_eq!(engine.scheduler.fire_due(engine.manager.as_ref()), 1);

    // A sweep racing the timer finds nothing left to do.
    let report = engine.scheduler.run_sweep_once(engine.manager.as_ref(), None);
    assert_eq!(report.examined, 0);

    assert!(!engine.platform.is_restricted(subject.key()));
    assert!(engine.store.fetch(&subject.key()).unwrap().is_none());
    assert_eq!(engine.platform.remove_calls(), 1);
    assert_eq!(lifted_count(&engine), 1);
}

#[test]
fn timer_lift_event_carries_resolved_subject() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(11), SubjectId(21));
    engine
        .manager
        .apply(&subject, Some("slurs"), Duration::from_secs(30))
        .unwrap();
    engine.clock.advance(Duration::from_secs(30));

    // Timer triggers carry only the key; the manager resolves the member.
    assert_eq!(engine.scheduler.fire_due(engine.manager.as_ref()), 1);

    let events = engine.events.lock();
    assert_eq!(
        *events,
        vec![SanctionEvent::SanctionLifted {
            subject,
            reason: "slurs".to_string(),
            source: LiftSource::Timer,
        }]
    );
}

#[test]
fn sweep_and_timer_race_lifts_once() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(1), SubjectId(1));
    engine
        .manager
        .apply(&subject, None, Duration::from_secs(5))
        .unwrap();
    engine.clock.advance(Duration::from_secs(5));

    let report = engine.scheduler.run_sweep_once(engine.manager.as_ref(), None);
    assert_eq!(report.lifted, 1);
    // Lift cancelled the timer, so nothing fires late.
    assert_eq!(engine.scheduler.fire_due(engine.manager.as_ref()), 0);
    assert_eq!(lifted_count(&engine), 1);
}

#[test]
fn crash_recovery_sweep_lifts_past_due_sqlite_record() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sanctions.sqlite3");

    // First process: apply, then "crash" with the timer lost.
    let subject;
    {
        let store: Arc<dyn SanctionStore> = Arc::new(SqliteSanctionStore::open(&db).unwrap());
        let first = engine_with_store(store);
        subject = first.platform.add_member(CommunityId(3), SubjectId(4));
        first
            .manager
            .apply(&subject, Some("raid"), Duration::from_secs(60))
            .unwrap();
    }

    // Second process: fresh timers, same database, clock past expiry.
    let store: Arc<dyn SanctionStore> = Arc::new(SqliteSanctionStore::open(&db).unwrap());
    let second = engine_with_store(store);
    second.platform.add_member(CommunityId(3), SubjectId(4));
    second.platform.force_restriction(subject.key(), "raid");
    second.clock.advance(Duration::from_secs(3_600));

    assert_eq!(second.scheduler.fire_due(second.manager.as_ref()), 0);
    let report = second.scheduler.run_sweep_once(second.manager.as_ref(), None);
    assert_eq!(report.examined, 1);
    assert_eq!(report.lifted, 1);
    assert!(!second.platform.is_restricted(subject.key()));
    assert!(second.store.list(None).unwrap().is_empty());
    assert_eq!(lifted_count(&second), 1);
}

#[test]
fn unresolvable_community_is_retried_on_next_sweep() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(5), SubjectId(6));
    engine
        .manager
        .apply(&subject, None, Duration::from_secs(10))
        .unwrap();
    engine.clock.advance(Duration::from_secs(10));
    let _ = engine.scheduler.timer_handle().take_due(i64::MAX);

    engine.platform.set_unreachable(CommunityId(5), true);
    let report = engine.scheduler.run_sweep_once(engine.manager.as_ref(), None);
    assert_eq!(report.skipped, 1);
    assert!(engine.store.fetch(&subject.key()).unwrap().is_some());

    engine.platform.set_unreachable(CommunityId(5), false);
    let report = engine.scheduler.run_sweep_once(engine.manager.as_ref(), None);
    assert_eq!(report.lifted, 1);
    assert!(engine.store.fetch(&subject.key()).unwrap().is_none());
}

#[test]
fn sweep_counts_platform_remove_failure_as_failed() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(2), SubjectId(3));
    engine
        .manager
        .apply(&subject, Some("spam"), Duration::from_secs(10))
        .unwrap();
    engine.clock.advance(Duration::from_secs(10));
    let _ = engine.scheduler.timer_handle().take_due(i64::MAX);
    engine
        .platform
        .fail_next_remove(PlatformError::unavailable("gateway timeout"));

    let report = engine.scheduler.run_sweep_once(engine.manager.as_ref(), None);
    assert_eq!(report.examined, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.lifted, 0);
    assert_eq!(lifted_count(&engine), 0);

    // The record was deleted before the platform call, so the restriction
    // is left for an operator and later sweeps have nothing to retry.
    assert!(engine.platform.is_restricted(subject.key()));
    assert!(engine.store.fetch(&subject.key()).unwrap().is_none());
    let report = engine.scheduler.run_sweep_once(engine.manager.as_ref(), None);
    assert_eq!(report.examined, 0);
}

#[test]
fn rejoin_reapplies_without_new_record_or_event() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(1), SubjectId(2));
    engine
        .manager
        .apply(&subject, Some("evasion"), Duration::from_secs(300))
        .unwrap();
    let before = engine.store.list(None).unwrap();

    let guard = RejoinGuard::new(Arc::clone(&engine.manager), engine.platform.clone());
    engine.platform.leave(subject.key());
    engine.platform.rejoin(subject.key());
    let outcome = guard
        .handle(RejoinNotice {
            community_id: CommunityId(1),
            subject_id: SubjectId(2),
        })
        .unwrap();

    assert!(matches!(outcome, RejoinOutcome::Reapplied(_)));
    assert!(engine.platform.is_restricted(subject.key()));
    assert_eq!(engine.store.list(None).unwrap(), before);
    assert!(engine.events.lock().is_empty());
}

#[test]
fn rejoin_after_expiry_takes_no_action() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(1), SubjectId(2));
    engine
        .manager
        .apply(&subject, None, Duration::from_secs(30))
        .unwrap();
    engine.platform.leave(subject.key());
    engine.clock.advance(Duration::from_secs(31));
    engine.platform.rejoin(subject.key());

    let guard = RejoinGuard::new(Arc::clone(&engine.manager), engine.platform.clone());
    let outcome = guard
        .handle(RejoinNotice {
            community_id: CommunityId(1),
            subject_id: SubjectId(2),
        })
        .unwrap();
    assert_eq!(outcome, RejoinOutcome::NoActiveSanction);
    assert!(!engine.platform.is_restricted(subject.key()));
}

#[test]
fn concurrent_lift_and_expiry_never_both_remove() {
    for _ in 0..25 {
        let engine = engine();
        let subject = engine.platform.add_member(CommunityId(1), SubjectId(1));
        let outcome = engine
            .manager
            .apply(&subject, None, Duration::from_secs(1))
            .unwrap();
        engine.clock.advance(Duration::from_secs(1));
        let trigger = ExpiryTrigger::from_record(outcome.record().unwrap(), LiftSource::Sweep)
            .with_subject(subject.clone());

        let lifter = {
            let manager = Arc::clone(&engine.manager);
            let subject = subject.clone();
            thread::spawn(move || manager.lift(&subject).unwrap())
        };
        let expirer = {
            let manager = Arc::clone(&engine.manager);
            thread::spawn(move || manager.expire(&trigger).unwrap())
        };
        let lifted = lifter.join().unwrap();
        let expired = expirer.join().unwrap();

        assert!(lifted ^ expired, "exactly one path removes the restriction");
        assert_eq!(engine.platform.remove_calls(), 1);
        assert_eq!(lifted_count(&engine), usize::from(expired));
    }
}

#[test]
fn failing_listener_does_not_block_lift_or_later_listeners() {
    let engine = engine();
    let notifier = Arc::clone(engine.manager.notifier());
    notifier.subscribe_fn(EventKind::SanctionLifted, |_| panic!("listener bug"));
    let heard = Arc::new(Mutex::new(0usize));
    {
        let heard = Arc::clone(&heard);
        notifier.subscribe_fn(EventKind::SanctionLifted, move |_| {
            *heard.lock() += 1;
            Ok(())
        });
    }

    let subject = engine.platform.add_member(CommunityId(1), SubjectId(1));
    engine
        .manager
        .apply(&subject, None, Duration::from_secs(1))
        .unwrap();
    engine.clock.advance(Duration::from_secs(1));

    assert_eq!(engine.scheduler.fire_due(engine.manager.as_ref()), 1);
    assert!(!engine.platform.is_restricted(subject.key()));
    assert_eq!(*heard.lock(), 1);
    assert_eq!(lifted_count(&engine), 1);
}

#[test]
fn punisher_dispatch_mutes_with_requested_duration() {
    let engine = engine();
    let subject = engine.platform.add_member(CommunityId(8), SubjectId(9));
    let punisher: &dyn Punisher = engine.manager.as_ref();
    assert_eq!(punisher.kind(), PunishmentKind::Mute);

    punisher
        .punish(
            &PunishmentContext {
                issued_by: "automod".to_string(),
                origin: "caps-filter".to_string(),
            },
            &subject,
            &Punishment::mute(Some("caps".to_string()), Some(Duration::from_secs(600))),
        )
        .unwrap();

    let record = engine.store.fetch(&subject.key()).unwrap().unwrap();
    assert_eq!(record.reason, "caps");
    assert_eq!(record.expires_at - record.imposed_at, 600);
    let events = engine.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::SanctionPunished);
}
