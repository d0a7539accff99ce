//! Append-only, clinic-scoped event persistence.

pub mod in_memory;
pub mod postgres;
mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
