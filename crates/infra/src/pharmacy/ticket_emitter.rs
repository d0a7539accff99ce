//! Billing ticket emission for validated dispensations.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use logiclinic_billing::{tickets_for, BillingTicket, BillingTicketId, OpenTicket, TicketCommand, TicketDraft};
use logiclinic_core::{AggregateId, ClinicId};
use logiclinic_dispensation::Dispensation;
use logiclinic_events::{EventBus, EventEnvelope};

use crate::aggregate_types;
use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::EventStore;

/// Ticket emission failure.
///
/// Emission runs after the dispensation is validated; this error never
/// rolls that back. Failed drafts are retained for retry.
#[derive(Debug, Error)]
pub enum TicketEmitError {
    #[error("billing ticket creation failed: {0}")]
    Creation(String),
}

impl TicketEmitError {
    pub fn code(&self) -> &'static str {
        "TICKET_CREATION_FAILED"
    }
}

/// A draft whose ticket could not be opened yet.
#[derive(Debug, Clone)]
pub struct PendingTicket {
    pub clinic_id: ClinicId,
    pub draft: TicketDraft,
}

/// Opens billing tickets for validated dispensations.
///
/// Failures are queued rather than propagated into the clinical record:
/// the dispensation and its stock decrement stay the source of truth, the
/// tickets are re-attempted via `retry_pending`.
pub struct TicketEmitter<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    pending: Mutex<Vec<PendingTicket>>,
}

impl<S, B> TicketEmitter<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>) -> Self {
        Self {
            dispatcher,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Open one ticket per distinct payer with a non-zero amount.
    ///
    /// On the first failure the failed draft and any untried drafts are
    /// queued and the error is surfaced; already-opened tickets are kept
    /// (they will not be re-emitted on retry).
    pub fn emit(
        &self,
        clinic_id: ClinicId,
        dispensation: &Dispensation,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillingTicketId>, TicketEmitError> {
        let drafts = tickets_for(dispensation);
        let mut opened = Vec::with_capacity(drafts.len());

        for (idx, draft) in drafts.iter().enumerate() {
            match self.open_ticket(clinic_id, draft, now) {
                Ok(ticket_id) => opened.push(ticket_id),
                Err(msg) => {
                    tracing::error!(
                        clinic_id = %clinic_id,
                        dispensation_id = %draft.reference_origine,
                        error = %msg,
                        "billing ticket emission failed; queued for retry"
                    );
                    if let Ok(mut pending) = self.pending.lock() {
                        for d in &drafts[idx..] {
                            pending.push(PendingTicket {
                                clinic_id,
                                draft: d.clone(),
                            });
                        }
                    }
                    return Err(TicketEmitError::Creation(msg));
                }
            }
        }

        Ok(opened)
    }

    /// Re-attempt every queued draft. Drafts that fail again are requeued.
    pub fn retry_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillingTicketId>, TicketEmitError> {
        let drafts: Vec<PendingTicket> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return Err(TicketEmitError::Creation("pending queue poisoned".into())),
        };

        let mut opened = Vec::new();
        let mut first_error = None;

        for item in drafts {
            match self.open_ticket(item.clinic_id, &item.draft, now) {
                Ok(ticket_id) => opened.push(ticket_id),
                Err(msg) => {
                    if let Ok(mut pending) = self.pending.lock() {
                        pending.push(item);
                    }
                    first_error.get_or_insert(msg);
                }
            }
        }

        match first_error {
            Some(msg) => Err(TicketEmitError::Creation(msg)),
            None => Ok(opened),
        }
    }

    pub fn pending(&self) -> Vec<PendingTicket> {
        self.pending
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn open_ticket(
        &self,
        clinic_id: ClinicId,
        draft: &TicketDraft,
        now: DateTime<Utc>,
    ) -> Result<BillingTicketId, String> {
        let aggregate_id = AggregateId::from_uuid(Uuid::now_v7());
        let ticket_id = BillingTicketId::new(aggregate_id);

        let cmd = TicketCommand::OpenTicket(OpenTicket {
            clinic_id,
            ticket_id,
            patient_id: draft.patient_id,
            service_origine: "pharmacie".to_string(),
            reference_origine: draft.reference_origine.clone(),
            type_acte: draft.type_acte.clone(),
            montant: draft.montant,
            payer: draft.payer.clone(),
            occurred_at: now,
        });

        self.dispatcher
            .dispatch::<BillingTicket>(
                clinic_id,
                aggregate_id,
                aggregate_types::BILLING_TICKET,
                cmd,
                |_clinic, id| BillingTicket::empty(BillingTicketId::new(id)),
            )
            .map_err(|e| e.to_string())?;

        Ok(ticket_id)
    }
}
