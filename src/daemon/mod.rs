//! Engine runtime and host signal plumbing.

pub mod runtime;
pub mod signals;
