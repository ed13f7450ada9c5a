//! Synchronous, typed event bus.
//!
//! Listeners for a kind run one after another on the firing thread, in
//! registration order. A listener that fails or panics is logged and counted;
//! the rest still run and the caller never sees the failure.

#![allow(missing_docs)]

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::events::{EventKind, SanctionEvent};

/// A consumer of sanction events.
pub trait SanctionListener: Send + Sync {
    /// Handle one event. An `Err` is logged by the notifier and otherwise ignored.
    fn on_event(&self, event: &SanctionEvent) -> Result<(), String>;
}

impl<F> SanctionListener for F
where
    F: Fn(&SanctionEvent) -> Result<(), String> + Send + Sync,
{
    fn on_event(&self, event: &SanctionEvent) -> Result<(), String> {
        self(event)
    }
}

/// Handle returned by [`EventNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Listeners that returned `Err`.
    pub failed: usize,
    /// Listeners that panicked.
    pub panicked: usize,
}

impl FireReport {
    /// Total listeners invoked.
    #[must_use]
    pub const fn invoked(&self) -> usize {
        self.delivered + self.failed + self.panicked
    }
}

struct Registration {
    id: SubscriptionId,
    kind: EventKind,
    listener: Arc<dyn SanctionListener>,
}

/// Registry of listeners keyed by [`EventKind`].
pub struct EventNotifier {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("listeners", &self.registrations.read().len())
            .finish()
    }
}

impl EventNotifier {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener` for events of `kind`.
    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: impl SanctionListener + 'static,
    ) -> SubscriptionId {
        self.subscribe_arc(kind, Arc::new(listener))
    }

    /// Register a closure for events of `kind`.
    pub fn subscribe_fn<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&SanctionEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.subscribe_arc(kind, Arc::new(f))
    }

    /// Register a shared listener for events of `kind`.
    pub fn subscribe_arc(
        &self,
        kind: EventKind,
        listener: Arc<dyn SanctionListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registrations.write().push(Registration { id, kind, listener });
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut regs = self.registrations.write();
        let before = regs.len();
        regs.retain(|r| r.id != id);
        regs.len() != before
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Deliver `event` to every listener subscribed to its kind.
    pub fn fire(&self, event: &SanctionEvent) -> FireReport {
        let kind = event.kind();
        // Snapshot so listeners may subscribe/unsubscribe without deadlocking.
        let targets: Vec<(SubscriptionId, Arc<dyn SanctionListener>)> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.id, Arc::clone(&r.listener)))
            .collect();

        let mut report = FireReport::default();
        for (id, listener) in targets {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(message)) => {
                    report.failed += 1;
                    eprintln!(
                        "[SWD-EVENTS] listener {} for {kind} failed: {message}",
                        id.0
                    );
                }
                Err(payload) => {
                    report.panicked += 1;
                    eprintln!(
                        "[SWD-EVENTS] listener {} for {kind} panicked: {}",
                        id.0,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{CommunityId, LiftSource, SubjectId};
    use crate::platform::Subject;
    use parking_lot::Mutex;

    fn lifted() -> SanctionEvent {
        SanctionEvent::SanctionLifted {
            subject: Subject::new(CommunityId(1), SubjectId(1)),
            reason: "r".to_string(),
            source: LiftSource::Timer,
        }
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let notifier = EventNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            notifier.subscribe_fn(EventKind::SanctionLifted, move |_| {
                seen.lock().push(tag);
                Ok(())
            });
        }

        let report = notifier.fire(&lifted());
        assert_eq!(report.delivered, 3);
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn only_matching_kind_is_delivered() {
        let notifier = EventNotifier::new();
        notifier.subscribe_fn(EventKind::SanctionPunished, |_| Ok(()));
        assert_eq!(notifier.fire(&lifted()).invoked(), 0);
        assert_eq!(notifier.listener_count(EventKind::SanctionPunished), 1);
    }

    #[test]
    fn failing_and_panicking_listeners_are_isolated() {
        let notifier = EventNotifier::new();
        let reached = Arc::new(Mutex::new(false));
        notifier.subscribe_fn(EventKind::SanctionLifted, |_| Err("webhook down".to_string()));
        notifier.subscribe_fn(EventKind::SanctionLifted, |_| panic!("listener bug"));
        let flag = Arc::clone(&reached);
        notifier.subscribe_fn(EventKind::SanctionLifted, move |_| {
            *flag.lock() = true;
            Ok(())
        });

        let report = notifier.fire(&lifted());
        assert_eq!(
            report,
            FireReport {
                delivered: 1,
                failed: 1,
                panicked: 1
            }
        );
        assert!(*reached.lock());
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let notifier = EventNotifier::new();
        let id = notifier.subscribe_fn(EventKind::SanctionLifted, |_| Ok(()));
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        assert_eq!(notifier.fire(&lifted()).invoked(), 0);
    }
}
