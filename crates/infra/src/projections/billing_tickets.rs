use serde_json::Value as JsonValue;

use logiclinic_billing::{BillingTicketId, Payer, TicketEvent, TicketStatus};
use logiclinic_core::{ClinicId, Money};
use logiclinic_events::EventEnvelope;
use logiclinic_prescriptions::PatientId;

use crate::read_model::ClinicStore;

use super::{ProjectionApplyError, StreamCursors};

/// Queryable billing ticket read model (the cash desk worklist).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketReadModel {
    pub ticket_id: BillingTicketId,
    pub patient_id: PatientId,
    pub service_origine: String,
    pub reference_origine: String,
    pub type_acte: String,
    pub montant: Money,
    pub payer: Payer,
    pub statut: TicketStatus,
}

/// Billing tickets projection.
#[derive(Debug)]
pub struct BillingTicketsProjection<S>
where
    S: ClinicStore<BillingTicketId, TicketReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> BillingTicketsProjection<S>
where
    S: ClinicStore<BillingTicketId, TicketReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        clinic_id: ClinicId,
        ticket_id: &BillingTicketId,
    ) -> Option<TicketReadModel> {
        self.store.get(clinic_id, ticket_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<TicketReadModel> {
        self.store.list(clinic_id)
    }

    pub fn list_pending(&self, clinic_id: ClinicId) -> Vec<TicketReadModel> {
        self.store
            .list(clinic_id)
            .into_iter()
            .filter(|t| t.statut == TicketStatus::EnAttente)
            .collect()
    }

    /// Apply a published envelope into the projection (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.check(clinic_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: TicketEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;

        let (event_clinic, ticket_id) = match &event {
            TicketEvent::TicketOpened(e) => (e.clinic_id, e.ticket_id),
            TicketEvent::TicketSettled(e) => (e.clinic_id, e.ticket_id),
            TicketEvent::TicketCancelled(e) => (e.clinic_id, e.ticket_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if ticket_id.0 != aggregate_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event ticket_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            TicketEvent::TicketOpened(e) => {
                self.store.upsert(
                    clinic_id,
                    e.ticket_id,
                    TicketReadModel {
                        ticket_id: e.ticket_id,
                        patient_id: e.patient_id,
                        service_origine: e.service_origine,
                        reference_origine: e.reference_origine,
                        type_acte: e.type_acte,
                        montant: e.montant,
                        payer: e.payer,
                        statut: TicketStatus::EnAttente,
                    },
                );
            }
            TicketEvent::TicketSettled(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.ticket_id) {
                    rm.statut = TicketStatus::Regle;
                    self.store.upsert(clinic_id, e.ticket_id, rm);
                }
            }
            TicketEvent::TicketCancelled(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.ticket_id) {
                    rm.statut = TicketStatus::Annule;
                    self.store.upsert(clinic_id, e.ticket_id, rm);
                }
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }
}
