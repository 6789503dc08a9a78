//! Forkline core: deterministic comparison and replay of recorded runs.
//!
//! A run is an ordered sequence of named steps, each carrying an ordered
//! sequence of structured events (inputs, outputs, tool calls, model calls,
//! errors). The core answers one question: given two runs that were supposed
//! to behave identically, at exactly which step, which event, which field did
//! they first differ?
//!
//! # Module dependency direction
//!
//! ```text
//! value ← canon ← {json_diff, redaction, first_divergence, compare}
//! model ← {first_divergence, compare, replay}
//! compare ← replay
//! ```
//!
//! One-way only. No cycles. Every operation here is a pure function of its
//! inputs or walks an immutable run snapshot: no I/O, no clocks, no logging,
//! no shared mutable state.

#![forbid(unsafe_code)]

pub mod canon;
pub mod compare;
pub mod first_divergence;
pub mod json_diff;
pub mod model;
pub mod redaction;
pub mod replay;
pub mod value;
