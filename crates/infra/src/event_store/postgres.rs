//! Postgres-backed event store.
//!
//! Events live in a single `clinic_events` table; the unique index on
//! `(clinic_id, aggregate_id, sequence_number)` is the last line of defense
//! for optimistic concurrency: a concurrent append that survives the version
//! check still collides on insert and maps to a concurrency error.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;

use logiclinic_core::{AggregateId, ClinicId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clinic_events (
    event_id        UUID PRIMARY KEY,
    clinic_id       UUID NOT NULL,
    aggregate_id    UUID NOT NULL,
    aggregate_type  TEXT NOT NULL,
    sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT NOT NULL,
    event_version   INT NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (clinic_id, aggregate_id, sequence_number)
);
CREATE INDEX IF NOT EXISTS clinic_events_stream_idx
    ON clinic_events (clinic_id, aggregate_id, sequence_number);
"#;

/// Postgres-backed append-only event store.
///
/// Uses runtime queries (no offline preparation step) and a transaction per
/// append: read the stream head, check the expected version, insert the
/// batch. Clinic isolation is a `WHERE clinic_id = $1` on every statement.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the events table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Load all events for a clinic + aggregate stream, oldest first.
    pub async fn load_stream_async(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, clinic_id, aggregate_id, aggregate_type,
                   sequence_number, event_type, event_version, occurred_at, payload
            FROM clinic_events
            WHERE clinic_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(clinic_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.into_iter().map(row_to_stored_event).collect()
    }

    /// Append a batch with the optimistic concurrency check, atomically.
    pub async fn append_async(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let clinic_id = events[0].clinic_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.clinic_id != clinic_id {
                return Err(EventStoreError::ClinicIsolation(format!(
                    "batch contains multiple clinic_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("append.begin", e))?;

        let current: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0)
            FROM clinic_events
            WHERE clinic_id = $1 AND aggregate_id = $2
            "#,
        )
        .bind(clinic_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("append.version", e))?;

        let current = current as u64;
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            sqlx::query(
                r#"
                INSERT INTO clinic_events (
                    event_id, clinic_id, aggregate_id, aggregate_type,
                    sequence_number, event_type, event_version, occurred_at, payload
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(e.event_id)
            .bind(e.clinic_id.as_uuid())
            .bind(e.aggregate_id.as_uuid())
            .bind(&e.aggregate_type)
            .bind(next as i64)
            .bind(&e.event_type)
            .bind(e.event_version as i32)
            .bind(e.occurred_at)
            .bind(&e.payload)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_sqlx_error("append.insert", err))?;

            committed.push(StoredEvent {
                event_id: e.event_id,
                clinic_id: e.clinic_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            });
            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("append.commit", e))?;

        Ok(committed)
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on_runtime("append", self.append_async(events, expected_version))
    }

    fn load_stream(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on_runtime("load_stream", self.load_stream_async(clinic_id, aggregate_id))
    }
}

/// Bridge the sync `EventStore` trait onto the async pool.
///
/// Callers must run on a thread where blocking is allowed; async callers
/// should use the `_async` methods directly.
fn block_on_runtime<T>(
    op: &str,
    fut: impl std::future::Future<Output = Result<T, EventStoreError>>,
) -> Result<T, EventStoreError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        EventStoreError::InvalidAppend(format!("{op}: no tokio runtime available"))
    })?;
    handle.block_on(fut)
}

fn row_to_stored_event(row: sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let get = |name: &str, e: sqlx::Error| {
        EventStoreError::InvalidAppend(format!("column {name}: {e}"))
    };

    let sequence_number: i64 = row
        .try_get("sequence_number")
        .map_err(|e| get("sequence_number", e))?;
    let event_version: i32 = row
        .try_get("event_version")
        .map_err(|e| get("event_version", e))?;
    let clinic_id: uuid::Uuid = row.try_get("clinic_id").map_err(|e| get("clinic_id", e))?;
    let aggregate_id: uuid::Uuid = row
        .try_get("aggregate_id")
        .map_err(|e| get("aggregate_id", e))?;
    let occurred_at: DateTime<Utc> = row
        .try_get("occurred_at")
        .map_err(|e| get("occurred_at", e))?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(|e| get("event_id", e))?,
        clinic_id: ClinicId::from_uuid(clinic_id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row
            .try_get("aggregate_type")
            .map_err(|e| get("aggregate_type", e))?,
        sequence_number: sequence_number as u64,
        event_type: row.try_get("event_type").map_err(|e| get("event_type", e))?,
        event_version: event_version as u32,
        occurred_at,
        payload: row.try_get("payload").map_err(|e| get("payload", e))?,
    })
}

fn map_sqlx_error(op: &str, err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(db) = &err {
        // 23505 = unique violation: a concurrent append won the race.
        if db.code().as_deref() == Some("23505") {
            return EventStoreError::Concurrency(format!("{op}: {db}"));
        }
    }
    EventStoreError::InvalidAppend(format!("{op}: {err}"))
}
