//! Host lifecycle signals: readiness, shutdown and on-demand sweep requests.
//!
//! `HostSignals` is the in-process side. Readiness and shutdown are one-shot
//! and broadcast by dropping a sender, so every thread blocked in `select!`
//! on the matching receiver wakes at once. With the `daemon` feature,
//! `SignalHandler` registers SIGTERM/SIGINT/SIGUSR1 through `signal-hook`
//! and the runtime loop polls its flags and forwards them here.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;

// ──────────────────── host signals ────────────────────

struct OneShot {
    fired: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl OneShot {
    fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            fired: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        // Dropping the only sender disconnects every receiver clone.
        self.tx.lock().take();
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Readiness and shutdown notifications shared by every engine thread.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct HostSignals {
    ready: Arc<OneShot>,
    shutdown: Arc<OneShot>,
    sweep_tx: Sender<()>,
    sweep_rx: Receiver<()>,
}

impl std::fmt::Debug for HostSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSignals")
            .field("ready", &self.is_ready())
            .field("shutdown", &self.is_shutdown_requested())
            .finish()
    }
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSignals {
    #[must_use]
    pub fn new() -> Self {
        let (sweep_tx, sweep_rx) = bounded(1);
        Self {
            ready: Arc::new(OneShot::new()),
            shutdown: Arc::new(OneShot::new()),
            sweep_tx,
            sweep_rx,
        }
    }

    /// The host finished connecting; the sweep may start.
    pub fn mark_ready(&self) {
        self.ready.fire();
    }

    /// Ask every engine thread to stop.
    pub fn request_shutdown(&self) {
        self.shutdown.fire();
    }

    /// Ask the sweep thread to run a cycle now. Coalesces with a pending request.
    pub fn request_sweep(&self) {
        match self.sweep_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                eprintln!("[SWD-SIGNAL] sweep request dropped: channel closed");
            }
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.is_fired()
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_fired()
    }

    /// Receiver that disconnects once the host is ready.
    #[must_use]
    pub fn ready_receiver(&self) -> Receiver<()> {
        self.ready.rx.clone()
    }

    /// Receiver that disconnects once shutdown is requested.
    #[must_use]
    pub fn shutdown_receiver(&self) -> Receiver<()> {
        self.shutdown.rx.clone()
    }

    /// Receiver yielding one message per pending sweep request.
    #[must_use]
    pub fn sweep_receiver(&self) -> Receiver<()> {
        self.sweep_rx.clone()
    }

    /// Block until shutdown is requested or `timeout` elapses.
    /// Returns whether shutdown was requested.
    #[must_use]
    pub fn wait_shutdown(&self, timeout: Duration) -> bool {
        if self.is_shutdown_requested() {
            return true;
        }
        match self.shutdown.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_shutdown_requested(),
        }
    }
}

// ──────────────────── OS signal handler ────────────────────

/// OS signal flags polled by the runtime loop.
#[cfg(feature = "daemon")]
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    sweep_flag: Arc<AtomicBool>,
}

#[cfg(feature = "daemon")]
impl SignalHandler {
    /// Create a new handler and register OS signal hooks.
    ///
    /// SIGTERM/SIGINT -> shutdown, SIGUSR1 -> immediate sweep (Unix only).
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            sweep_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check whether a shutdown has been requested.
    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate sweep has been requested.
    #[must_use]
    pub fn should_sweep(&self) -> bool {
        self.sweep_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_sweep(&self) {
        self.sweep_flag.store(true, Ordering::Relaxed);
    }

    /// Forward pending OS requests to `signals`.
    pub fn forward_to(&self, signals: &HostSignals) {
        if self.should_shutdown() {
            signals.request_shutdown();
        }
        if self.should_sweep() {
            signals.request_sweep();
        }
    }

    fn register_signals(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[SWD-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[SWD-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.sweep_flag)) {
                eprintln!("[SWD-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

#[cfg(feature = "daemon")]
impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── shutdown coordinator ────────────────────

/// Runs named shutdown steps in order within an overall time budget.
pub struct ShutdownCoordinator {
    pub timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the default 30-second timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }

    /// Run each step; returns `true` if all succeeded within the timeout.
    pub fn execute(&self, steps: &mut [(&str, &mut dyn FnMut() -> bool)]) -> bool {
        let start = Instant::now();
        let mut all_ok = true;

        for (name, step) in steps.iter_mut() {
            if start.elapsed() > self.timeout {
                eprintln!("[SWD-SHUTDOWN] timeout reached, abandoning remaining steps");
                return false;
            }

            if step() {
                eprintln!("[SWD-SHUTDOWN] {name}: ok");
            } else {
                eprintln!("[SWD-SHUTDOWN] {name}: failed");
                all_ok = false;
            }
        }

        all_ok
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── tests ────────────────────
