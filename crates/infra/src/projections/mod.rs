//! Read models built from published envelopes.
//!
//! Projections are disposable and idempotent: each keeps a per-aggregate
//! cursor and ignores envelopes it has already seen.

pub mod activity;

pub use activity::{ActivityEntry, ActivityFeed};
