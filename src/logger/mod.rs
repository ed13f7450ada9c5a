//! Activity logging: append-only JSONL written by a dedicated logger thread.

pub mod activity;
pub mod jsonl;
