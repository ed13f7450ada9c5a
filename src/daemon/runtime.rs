//! Engine runtime: wires the store, notifier, activity log, manager,
//! scheduler threads and rejoin guard, then runs until shutdown.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::Config;
use crate::core::errors::{Result, SwdError};
use crate::daemon::signals::{HostSignals, ShutdownCoordinator};
use crate::events::{EventNotifier, listeners};
use crate::lifecycle::{
    ExpiryHandler, ExpiryTimers, RejoinGuard, SanctionManager, SanctionScheduler, SchedulerThreads,
};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::platform::MembershipPlatform;
use crate::store::{SanctionStore, SqliteSanctionStore};

/// How often `run` checks for shutdown and OS signals.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The assembled sanction engine.
pub struct SanctionDaemon {
    config: Config,
    platform: Arc<dyn MembershipPlatform>,
    manager: Arc<SanctionManager>,
    scheduler: Option<SanctionScheduler>,
    signals: HostSignals,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    external_readiness: bool,
    #[cfg(feature = "daemon")]
    signal_handler: Option<crate::daemon::signals::SignalHandler>,
}

impl SanctionDaemon {
    /// Build the engine over the SQLite store named in `config`.
    pub fn init(config: Config, platform: Arc<dyn MembershipPlatform>) -> Result<Self> {
        let store = Arc::new(SqliteSanctionStore::open(&config.paths.sqlite_db)?);
        Self::with_parts(config, platform, store, Arc::new(SystemClock))
    }

    /// Build the engine over an explicit store and clock.
    pub fn with_parts(
        config: Config,
        platform: Arc<dyn MembershipPlatform>,
        store: Arc<dyn SanctionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        // 1. Activity log.
        let logger_config =
            ActivityLoggerConfig::new(config.paths.activity_log.clone(), &config.logging);
        let (logger_handle, logger_join) = spawn_logger(logger_config)?;

        // 2. Event bus with the configured built-in listeners.
        let notifier = Arc::new(EventNotifier::new());
        let installed = listeners::install(&notifier, &config.events);
        if !installed.is_empty() {
            eprintln!(
                "[SWD-DAEMON] installed {} event subscriptions ({})",
                installed.len(),
                config.events.channels.join(", ")
            );
        }

        // 3. Timers, manager, scheduler.
        let timers = ExpiryTimers::new();
        let manager = Arc::new(
            SanctionManager::new(
                Arc::clone(&store),
                Arc::clone(&platform),
                Arc::clone(&clock),
                timers.handle(),
                notifier,
                config.sanctions.clone(),
            )
            .with_activity_log(logger_handle.clone()),
        );
        let scheduler = SanctionScheduler::new(
            store,
            Arc::clone(&platform),
            clock,
            timers,
            config.scheduler.clone(),
        )
        .with_activity_log(logger_handle.clone());

        Ok(Self {
            config,
            platform,
            manager,
            scheduler: Some(scheduler),
            signals: HostSignals::new(),
            logger_handle,
            logger_join: Some(logger_join),
            external_readiness: false,
            #[cfg(feature = "daemon")]
            signal_handler: None,
        })
    }

    /// Leave readiness to the host: the sweep starts only after
    /// `signals().mark_ready()`.
    #[must_use]
    pub fn with_external_readiness(mut self) -> Self {
        self.external_readiness = true;
        self
    }

    /// Bridge SIGTERM/SIGINT/SIGUSR1 into the engine's host signals.
    #[cfg(feature = "daemon")]
    #[must_use]
    pub fn with_os_signals(mut self) -> Self {
        self.signal_handler = Some(crate::daemon::signals::SignalHandler::new());
        self
    }

    /// Manager for callers that apply and lift sanctions.
    #[must_use]
    pub fn manager(&self) -> Arc<SanctionManager> {
        Arc::clone(&self.manager)
    }

    #[must_use]
    pub fn signals(&self) -> HostSignals {
        self.signals.clone()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run until shutdown is requested, then stop every thread.
    pub fn run(mut self) -> Result<()> {
        let start_time = Instant::now();
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
        });

        match self.manager.restore_timers() {
            Ok(armed) => eprintln!("[SWD-DAEMON] restored {armed} expiry timers"),
            Err(e) => {
                eprintln!("[SWD-DAEMON] could not restore timers, sweep will catch up: {e}");
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("timer restore failed: {e}"),
                });
            }
        }

        let scheduler = self.scheduler.take().ok_or_else(|| SwdError::Runtime {
            details: "scheduler already started".to_string(),
        })?;
        let handler: Arc<dyn ExpiryHandler> = self.manager.clone();
        let scheduler_threads = scheduler.start(handler, &self.signals)?;
        let rejoin_join = RejoinGuard::new(Arc::clone(&self.manager), Arc::clone(&self.platform))
            .start(&self.signals)?;

        if !self.external_readiness {
            self.signals.mark_ready();
        }
        eprintln!("[SWD-DAEMON] running");

        // ──────── main loop ────────
        loop {
            #[cfg(feature = "daemon")]
            if let Some(handler) = &self.signal_handler {
                handler.forward_to(&self.signals);
            }
            if self.signals.wait_shutdown(POLL_INTERVAL) {
                eprintln!("[SWD-DAEMON] shutdown requested");
                break;
            }
        }

        self.shutdown(scheduler_threads, rejoin_join, start_time)
    }

    // ──────────────────── shutdown ────────────────────

    fn shutdown(
        &mut self,
        scheduler_threads: SchedulerThreads,
        rejoin_join: thread::JoinHandle<()>,
        start_time: Instant,
    ) -> Result<()> {
        let mut scheduler_threads = Some(scheduler_threads);
        let mut rejoin_join = Some(rejoin_join);

        let mut join_scheduler = || scheduler_threads.take().is_none_or(|t| t.join());
        let mut join_rejoin = || rejoin_join.take().is_none_or(|h| h.join().is_ok());
        let mut steps: [(&str, &mut dyn FnMut() -> bool); 2] = [
            ("scheduler threads", &mut join_scheduler),
            ("rejoin guard", &mut join_rejoin),
        ];
        let clean = ShutdownCoordinator::new().execute(&mut steps);

        let uptime_secs = start_time.elapsed().as_secs();
        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: if clean {
                "clean shutdown".to_string()
            } else {
                "shutdown with thread failures".to_string()
            },
            uptime_secs,
        });
        self.logger_handle.shutdown();
        if let Some(logger_join) = self.logger_join.take() {
            let _ = logger_join.join();
        }

        eprintln!("[SWD-DAEMON] shutdown complete (uptime={uptime_secs}s)");
        if clean {
            Ok(())
        } else {
            Err(SwdError::Runtime {
                details: "one or more engine threads panicked".to_string(),
            })
        }
    }
}
