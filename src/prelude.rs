//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use sanction_warden::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SwdError};
pub use crate::core::model::{CommunityId, LiftSource, Sanction, SanctionKey, SubjectId};

// Platform
pub use crate::platform::memory::InMemoryPlatform;
pub use crate::platform::{
    Community, MembershipPlatform, PlatformError, PlatformErrorKind, RejoinNotice, Subject,
};

// Store
pub use crate::store::{InMemorySanctionStore, SanctionStore, SqliteSanctionStore};

// Lifecycle
pub use crate::lifecycle::{
    ApplyOutcome, ExpiryHandler, ExpiryTimers, ExpiryTrigger, RejoinGuard, RejoinOutcome,
    SanctionManager, SanctionScheduler, SweepReport, TimerHandle,
};

// Events
pub use crate::events::{
    EventKind, EventNotifier, FireReport, SanctionEvent, SanctionListener, SubscriptionId,
};

// Punishment dispatch
pub use crate::punishment::{Punisher, Punishment, PunishmentContext, PunishmentKind};

// Runtime
pub use crate::daemon::runtime::SanctionDaemon;
pub use crate::daemon::signals::HostSignals;
