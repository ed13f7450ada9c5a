//! Sanction lifecycle engine: per-key locking, the manager, two-tier expiry
//! scheduling, and rejoin enforcement.

pub mod locks;
pub mod manager;
pub mod rejoin;
pub mod scheduler;

pub use locks::{KeyGuard, KeyedLocks};
pub use manager::{ApplyOutcome, SanctionManager};
pub use rejoin::{RejoinGuard, RejoinOutcome};
pub use scheduler::{
    ExpiryHandler, ExpiryTimers, ExpiryTrigger, SanctionScheduler, SchedulerThreads, SweepReport,
    TimerHandle,
};
