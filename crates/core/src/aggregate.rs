//! Aggregate root trait and the per-aggregate event buffer.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Aggregates are loaded fresh per request, mutated in memory, and persisted by
/// infrastructure as a single unit. They never perform IO themselves.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Persisted version of the aggregate's state.
    ///
    /// Incremented by the store on every committed update; used for optimistic
    /// concurrency checks.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for inserts, migrations, etc.).
    Any,
    /// Require the aggregate to be at an exact version.
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
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Buffer of domain events raised while an aggregate is being mutated.
///
/// Events stay on the aggregate until infrastructure drains them at commit
/// time. Draining always empties the buffer, whatever happens downstream.
pub trait EventRecorder {
    type Event: Clone + core::fmt::Debug;

    /// Events recorded since the last drain.
    fn pending_events(&self) -> &[Self::Event];

    /// Remove and return every pending event.
    fn take_events(&mut self) -> Vec<Self::Event>;
}
