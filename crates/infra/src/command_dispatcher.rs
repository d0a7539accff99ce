//! Command execution pipeline (application-level orchestration).
//!
//! One consistent lifecycle for every aggregate: load history, rehydrate,
//! handle the command, append with the expected version, publish. The
//! expected-version append is what serializes concurrent writers on one
//! stream; losers get a concurrency error and can reload and retry.
//!
//! This module contains no IO itself; it composes the store and bus traits.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use logiclinic_core::{Aggregate, AggregateId, ClinicId, DomainError, ExpectedVersion};
use logiclinic_events::{Command, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Clinic isolation violation (cross-clinic or cross-aggregate mixing).
    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    /// Deterministic domain failure (validation, invariant, business rule).
    #[error(transparent)]
    Domain(DomainError),

    /// Failed to deserialize historical payloads into the aggregate event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; the
    /// events are persisted, retrying publication may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    /// Stable code rendered to callers.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Concurrency(_) => "CONFLICT",
            DispatchError::ClinicIsolation(_) => "CLINIC_ISOLATION",
            DispatchError::Domain(e) => e.code(),
            DispatchError::Deserialize(_) => "DESERIALIZE_ERROR",
            DispatchError::Store(_) => "STORE_ERROR",
            DispatchError::Publish(_) => "PUBLISH_ERROR",
        }
    }

    pub fn not_found() -> Self {
        DispatchError::Domain(DomainError::NotFound)
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::ClinicIsolation(msg) => DispatchError::ClinicIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Domain(value)
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run fully in memory and the same
/// domain code runs against Postgres in production.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rebuild an aggregate from its stream without dispatching anything.
    ///
    /// Read-side loading for orchestration code that needs to inspect an
    /// aggregate (remaining quantities, lot availability) before deciding
    /// which commands to send. An aggregate that was never written to has
    /// `version() == 0`.
    pub fn rehydrate<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: logiclinic_events::Event + DeserializeOwned,
    {
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// 1. Load the stream (clinic-scoped) and validate it
    /// 2. Rehydrate the aggregate
    /// 3. Handle the command (pure decision, no mutation)
    /// 4. Append the decided events, expecting the loaded version
    /// 5. Publish the committed events to the bus
    ///
    /// A concurrent writer between steps 1 and 4 makes the append fail with
    /// `DispatchError::Concurrency`; nothing is persisted or published.
    pub fn dispatch<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: logiclinic_events::Command,
        A::Event: logiclinic_events::Event + Serialize + DeserializeOwned,
    {
        // 0) The command must target the stream it is dispatched to.
        if command.target_aggregate_id() != aggregate_id {
            return Err(DispatchError::Domain(DomainError::invariant(
                "command targets a different aggregate",
            )));
        }

        // 1) Load history (clinic-scoped)
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    clinic_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce clinic isolation even if a buggy backend returns cross-clinic
    // data, and require strictly increasing sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.clinic_id != clinic_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong clinic_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
