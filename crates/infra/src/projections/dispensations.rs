use serde_json::Value as JsonValue;

use logiclinic_core::{ClinicId, Money};
use logiclinic_dispensation::{
    DispensationEvent, DispensationId, DispensationLine, DispensationStatus,
};
use logiclinic_events::EventEnvelope;
use logiclinic_prescriptions::{PatientId, PrescriptionId};

use crate::read_model::ClinicStore;

use super::{ProjectionApplyError, StreamCursors};

/// Queryable dispensation read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispensationReadModel {
    pub dispensation_id: DispensationId,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub status: DispensationStatus,
    pub lines: Vec<DispensationLine>,
    pub montant_total: Money,
    pub montant_assurance: Money,
    pub montant_patient: Money,
}

/// Dispensations projection.
#[derive(Debug)]
pub struct DispensationsProjection<S>
where
    S: ClinicStore<DispensationId, DispensationReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> DispensationsProjection<S>
where
    S: ClinicStore<DispensationId, DispensationReadModel>,
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
        dispensation_id: &DispensationId,
    ) -> Option<DispensationReadModel> {
        self.store.get(clinic_id, dispensation_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<DispensationReadModel> {
        self.store.list(clinic_id)
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

        let event: DispensationEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;

        let (event_clinic, dispensation_id) = match &event {
            DispensationEvent::DispensationStarted(e) => (e.clinic_id, e.dispensation_id),
            DispensationEvent::LineAdded(e) => (e.clinic_id, e.dispensation_id),
            DispensationEvent::DispensationFinalized(e) => (e.clinic_id, e.dispensation_id),
            DispensationEvent::DispensationValidated(e) => (e.clinic_id, e.dispensation_id),
            DispensationEvent::DispensationCancelled(e) => (e.clinic_id, e.dispensation_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if dispensation_id.0 != aggregate_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event dispensation_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            DispensationEvent::DispensationStarted(e) => {
                self.store.upsert(
                    clinic_id,
                    e.dispensation_id,
                    DispensationReadModel {
                        dispensation_id: e.dispensation_id,
                        prescription_id: e.prescription_id,
                        patient_id: e.patient_id,
                        status: DispensationStatus::EnCours,
                        lines: Vec::new(),
                        montant_total: Money::zero(),
                        montant_assurance: Money::zero(),
                        montant_patient: Money::zero(),
                    },
                );
            }
            DispensationEvent::LineAdded(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.dispensation_id) {
                    rm.lines.push(e.line);
                    self.store.upsert(clinic_id, e.dispensation_id, rm);
                }
            }
            DispensationEvent::DispensationFinalized(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.dispensation_id) {
                    rm.status = DispensationStatus::Terminee;
                    rm.montant_total = e.montant_total;
                    rm.montant_assurance = e.montant_assurance;
                    rm.montant_patient = e.montant_patient;
                    self.store.upsert(clinic_id, e.dispensation_id, rm);
                }
            }
            DispensationEvent::DispensationValidated(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.dispensation_id) {
                    rm.status = DispensationStatus::Validee;
                    self.store.upsert(clinic_id, e.dispensation_id, rm);
                }
            }
            DispensationEvent::DispensationCancelled(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.dispensation_id) {
                    rm.status = DispensationStatus::Annulee;
                    self.store.upsert(clinic_id, e.dispensation_id, rm);
                }
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }
}
