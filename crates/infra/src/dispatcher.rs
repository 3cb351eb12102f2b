//! Command execution pipeline over row-backed aggregates.
//!
//! ```text
//! loaded aggregate (row + revision)
//!   -> decide   (handle, pure, may be inspected by the caller)
//!   -> evolve   (apply each decided event to a copy)
//!   -> persist  (insert, or update guarded by ExpectedVersion::Exact)
//!   -> publish  (one envelope per event, after the write)
//! ```
//!
//! The row is the source of truth. Publication happens only after a
//! successful write; a bus failure is logged and does not undo the write.

use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use bulkyard_core::{Aggregate, DomainError, ExpectedVersion};
use bulkyard_events::{Event, EventBus, EventEnvelope};

use crate::error::ServiceResult;
use crate::records::IntoRow;
use crate::store::RecordStore;

/// Outcome of `handle` plus the state it leads to, not yet persisted.
#[derive(Debug, Clone)]
pub struct Decision<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    base_revision: u64,
}

/// A persisted decision. `aggregate.version()` is the stored revision.
#[derive(Debug, Clone)]
pub struct Committed<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
}

#[derive(Debug)]
pub struct CommandDispatcher<B> {
    bus: B,
}

impl<B> CommandDispatcher<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> CommandDispatcher<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `handle` and fold the events into a copy of the aggregate.
    pub fn decide<A>(&self, aggregate: &A, command: &A::Command) -> Result<Decision<A>, DomainError>
    where
        A: Aggregate<Error = DomainError> + Clone,
    {
        let events = aggregate.handle(command)?;
        let mut next = aggregate.clone();
        for event in &events {
            next.apply(event);
        }
        Ok(Decision {
            aggregate: next,
            events,
            base_revision: aggregate.version(),
        })
    }

    /// Persist a decision and publish its events.
    ///
    /// A never-stored aggregate (revision 0) is inserted; anything else is
    /// updated under `ExpectedVersion::Exact(base)`, so a concurrent writer
    /// surfaces as a version conflict instead of a lost update.
    pub fn commit<A, S>(
        &self,
        store: &S,
        aggregate_type: &'static str,
        decision: Decision<A>,
    ) -> ServiceResult<Committed<A>>
    where
        A: Aggregate + IntoRow,
        A::Id: Copy + Into<Uuid>,
        A::Event: Event + Serialize,
        S: RecordStore<A::Row> + ?Sized,
    {
        let Decision {
            aggregate,
            events,
            base_revision,
        } = decision;
        if events.is_empty() {
            return Ok(Committed { aggregate, events });
        }

        let row = aggregate.to_row().ok_or_else(DomainError::not_found)?;
        let revision = aggregate.version();
        if base_revision == 0 {
            store.insert(row, revision)?;
        } else {
            store.update(row, ExpectedVersion::Exact(base_revision), revision)?;
        }

        let aggregate_id: Uuid = (*aggregate.id()).into();
        for (offset, event) in events.iter().enumerate() {
            let envelope = envelope_for(aggregate_id, aggregate_type, base_revision + 1 + offset as u64, event);
            if let Err(e) = self.bus.publish(envelope) {
                tracing::warn!(
                    aggregate_type,
                    %aggregate_id,
                    event_type = event.event_type(),
                    "event publication failed after commit: {e:?}"
                );
            }
        }

        Ok(Committed { aggregate, events })
    }

    /// `decide` then `commit`.
    pub fn dispatch<A, S>(
        &self,
        store: &S,
        aggregate_type: &'static str,
        aggregate: &A,
        command: &A::Command,
    ) -> ServiceResult<Committed<A>>
    where
        A: Aggregate<Error = DomainError> + IntoRow + Clone,
        A::Id: Copy + Into<Uuid>,
        A::Event: Event + Serialize,
        S: RecordStore<A::Row> + ?Sized,
    {
        let decision = self.decide(aggregate, command)?;
        self.commit(store, aggregate_type, decision)
    }
}

fn envelope_for<E>(aggregate_id: Uuid, aggregate_type: &str, sequence: u64, event: &E) -> EventEnvelope<JsonValue>
where
    E: Event + Serialize,
{
    let payload = serde_json::to_value(event).unwrap_or(JsonValue::Null);
    EventEnvelope::new(
        Uuid::now_v7(),
        aggregate_id,
        aggregate_type,
        sequence,
        event.event_type(),
        event.describe(),
        event.occurred_at(),
        payload,
    )
}
