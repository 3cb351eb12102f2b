//! Domain events and their distribution.
//!
//! Aggregates describe what happened as typed events; the infrastructure wraps
//! committed events in an [`EventEnvelope`] and fans them out over an
//! [`EventBus`] to projections such as the activity feed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
