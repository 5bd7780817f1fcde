//! Core aggregate and domain event traits.

use common::ExecutionId;
use history::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened. They are immutable,
/// named in past tense, and stored as history payloads.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is used as the history event type and for filtering.
    fn event_type(&self) -> &'static str;
}

/// Trait for state rebuilt by folding a recorded history.
///
/// `apply` must be pure and deterministic: the same history always yields
/// the same state, which is what makes replay after a crash safe.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate consumes.
    type Event: DomainEvent;

    /// Returns the aggregate type name, stored as the history's workflow type.
    fn aggregate_type() -> &'static str;

    /// Returns the execution this state belongs to, or None before the
    /// first event has been applied.
    fn id(&self) -> Option<ExecutionId>;

    /// Returns the version of the last applied event.
    fn version(&self) -> Version;

    /// Sets the version. Called by loaders after folding stored events.
    fn set_version(&mut self, version: Version);

    /// Applies an event. Must not fail: events are facts that already happened.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
