//! `logiclinic-events` — event/command abstractions shared by all modules.
//!
//! Domain crates emit events through these contracts; infrastructure decides
//! how events are stored, published and projected.

pub mod bus;
pub mod clinic;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod projection;
pub mod runner;

pub use bus::{EventBus, Subscription};
pub use clinic::ClinicScoped;
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::{execute, CommandHandler};
pub use in_memory_bus::InMemoryEventBus;
pub use projection::Projection;
pub use runner::{ProjectionCursor, ProjectionError, ProjectionRunner};
