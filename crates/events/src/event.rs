use chrono::{DateTime, Utc};

/// A fact emitted by an aggregate.
///
/// Events are immutable and versioned; `event_type` is a stable dotted name
/// such as `"loading.completed"`.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// One-line human readable summary for activity listings.
    fn describe(&self) -> String;
}
