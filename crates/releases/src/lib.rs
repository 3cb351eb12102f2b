//! Release ledger domain module.
//!
//! A release authorizes withdrawing a bounded quantity of one product from one
//! warehouse for a client order. This crate holds the pure rules: creation
//! validation, derived status, cancellation and clamped withdrawal recording.

pub mod reference;
pub mod release;

pub use reference::OrderReference;
pub use release::{
    CancelRelease, CreateRelease, RecordWithdrawal, Release, ReleaseCancelled, ReleaseCommand,
    ReleaseCreated, ReleaseEvent, ReleaseSnapshot, ReleaseStatus, WithdrawalRecorded,
};
