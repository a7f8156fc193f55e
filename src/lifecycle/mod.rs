//! Logical deletion and physical reclamation.
//!
//! Deletion is tombstone-first: a version leaves circulation immediately
//! but its rows and bytes survive until the retention window closes. The
//! GC engine then reclaims in two phases — mark what is reachable, sweep
//! what is not — with a dry-run mode that never mutates.

pub mod gc;
pub mod tombstone;

pub use gc::{GcEngine, GcParams};
pub use tombstone::{TombstoneOutcome, TombstoneService};
