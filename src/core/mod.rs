//! Core types: errors, configuration, the sanction model and the clock.

pub mod clock;
pub mod config;
pub mod errors;
pub mod model;
