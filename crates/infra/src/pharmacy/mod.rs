//! The prescription → dispensation → stock → billing workflow.
//!
//! Aggregates decide locally; this module is the cross-aggregate
//! orchestration: staleness and availability gates, guarded stock
//! decrements with compensation, and post-validation ticket emission.

pub mod policy;
pub mod processor;
pub mod ticket_emitter;

pub use policy::DispensingPolicy;
pub use processor::{
    AddLineOutcome, DispensationProcessor, ExpiryWarning, WorkflowError,
};
pub use ticket_emitter::{PendingTicket, TicketEmitError, TicketEmitter};
