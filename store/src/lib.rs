//! Forkline store: append-only local persistence for recorded runs.
//!
//! Backed by an embedded SQLite database. Redaction happens here, at the
//! storage boundary: every payload passes through the store's
//! [`forkline_core::redaction::RedactionPolicy`] before it is written.
//! Events within a step are returned in insertion order on load; steps in
//! `idx` order. The core never sees this crate; it consumes the loaded
//! `Run` records only.

#![forbid(unsafe_code)]

pub mod store;
pub mod tracer;

pub use store::{RunInfo, SqliteStore, StoreError};
pub use tracer::Tracer;
