use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Read models are **disposable**: events are the source of truth and any
/// projection can be rebuilt from scratch by replay. Because delivery is
/// at-least-once, `apply` must be idempotent; the `ProjectionRunner` helps by
/// tracking sequence numbers and rejecting replays below the cursor.
///
/// Storage is out of scope here: a projection may keep its read model in
/// memory, in Postgres, or anywhere else.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    ///
    /// Must scope every update to the envelope's clinic; projections are the
    /// second line of defense against cross-clinic leaks.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
