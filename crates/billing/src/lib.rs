//! `logiclinic-billing` — payer-facing tickets emitted by clinical services.

pub mod ticket;

pub use ticket::{
    tickets_for, BillingTicket, BillingTicketId, CancelTicket, OpenTicket, Payer, PayerType,
    SettleTicket, TicketCancelled, TicketCommand, TicketDraft, TicketEvent, TicketOpened,
    TicketSettled, TicketStatus,
};
