use crate::{Command, Event};

/// Handles a command and emits events (command handler abstraction).
///
/// A standalone command -> events interface, independent of the aggregate
/// lifecycle. Useful for workers and for tests that do not need the full
/// dispatcher pipeline.
pub trait CommandHandler {
    type Cmd: Command;
    type Ev: Event;
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn handle(&self, command: Self::Cmd) -> Result<Vec<Self::Ev>, Self::Error>;
}

/// Execute an aggregate command deterministically (no IO, no async).
///
/// Decide (`handle`) then evolve (`apply`) in one step, mutating the
/// aggregate in place. For the persisted pipeline (store + bus + optimistic
/// concurrency) use the infra dispatcher instead; this helper is for tests
/// and inline processing.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: logiclinic_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
