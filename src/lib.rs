#![forbid(unsafe_code)]

//! Sanction Warden (swd) — a timed sanction lifecycle engine.
//!
//! A sanction restricts a subject in a community for a bounded or unbounded
//! time. Bounded sanctions are persisted so they survive restarts, expire
//! through an inline timer backed by a periodic recovery sweep, and are put
//! back if the subject leaves and rejoins before they end.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use sanction_warden::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use sanction_warden::core::config::Config;
//! use sanction_warden::lifecycle::manager::{ApplyOutcome, SanctionManager};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod events;
pub mod lifecycle;
pub mod logger;
pub mod platform;
pub mod punishment;
pub mod store;
