//! Aggregate contract for the shipment lifecycle entities.

use crate::error::{DomainError, DomainResult};

/// Identity and revision of a persisted domain entity.
///
/// Releases, schedules, loadings and stock balances are stored as single rows;
/// `version` is the row revision used for optimistic concurrency on update.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Row revision this state was loaded at (0 for a never-stored aggregate).
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a row update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip the revision check (inserts, repair tooling).
    Any,
    /// Require the stored row to be at exactly this revision.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale revision (expected: {self:?}, stored: {actual})"
            )))
        }
    }
}

/// Decide/evolve split for the domain entities.
///
/// - `handle(&self, cmd)` validates a command against current state and returns
///   the events describing what happened. It never mutates.
/// - `apply(&mut self, event)` folds one event into the state.
///
/// Neither side performs IO; loading and storing rows is the job of the
/// application services.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_every_revision() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn exact_mismatch_is_a_conflict() {
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(ExpectedVersion::Exact(4).check(4).is_ok());
    }
}
