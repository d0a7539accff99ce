use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use logiclinic_core::ClinicId;
use logiclinic_events::EventEnvelope;
use logiclinic_prescriptions::{
    PatientId, PrescriptionEvent, PrescriptionId, PrescriptionStatus,
};
use logiclinic_stock::MedicationId;

use crate::read_model::ClinicStore;

use super::{ProjectionApplyError, StreamCursors};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionLineReadModel {
    pub line_no: u32,
    pub medication_id: MedicationId,
    pub medication_label: String,
    pub quantity_prescribed: i64,
    pub quantity_dispensed: i64,
}

impl PrescriptionLineReadModel {
    pub fn remaining(&self) -> i64 {
        self.quantity_prescribed - self.quantity_dispensed
    }
}

/// Queryable prescription read model, serving the dispensing queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionReadModel {
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub consultation_ref: Option<String>,
    pub status: PrescriptionStatus,
    pub prescribed_at: DateTime<Utc>,
    pub lines: Vec<PrescriptionLineReadModel>,
}

impl PrescriptionReadModel {
    pub fn has_open_lines(&self) -> bool {
        self.lines.iter().any(|l| l.remaining() > 0)
    }
}

/// Active prescriptions projection.
#[derive(Debug)]
pub struct ActivePrescriptionsProjection<S>
where
    S: ClinicStore<PrescriptionId, PrescriptionReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ActivePrescriptionsProjection<S>
where
    S: ClinicStore<PrescriptionId, PrescriptionReadModel>,
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
        prescription_id: &PrescriptionId,
    ) -> Option<PrescriptionReadModel> {
        self.store.get(clinic_id, prescription_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<PrescriptionReadModel> {
        self.store.list(clinic_id)
    }

    /// Dispensable prescriptions, oldest first.
    ///
    /// Ordering biases the pharmacy queue toward the longest-waiting
    /// prescriptions.
    pub fn list_active(&self, clinic_id: ClinicId) -> Vec<PrescriptionReadModel> {
        let mut active: Vec<_> = self
            .store
            .list(clinic_id)
            .into_iter()
            .filter(|p| {
                matches!(
                    p.status,
                    PrescriptionStatus::Prescrit | PrescriptionStatus::PartiellementDispense
                ) && p.has_open_lines()
            })
            .collect();

        active.sort_by_key(|p| p.prescribed_at);
        active
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

        let event: PrescriptionEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;

        let (event_clinic, prescription_id) = match &event {
            PrescriptionEvent::PrescriptionCreated(e) => (e.clinic_id, e.prescription_id),
            PrescriptionEvent::QuantitiesDispensed(e) => (e.clinic_id, e.prescription_id),
            PrescriptionEvent::QuantitiesReversed(e) => (e.clinic_id, e.prescription_id),
            PrescriptionEvent::PrescriptionCancelled(e) => (e.clinic_id, e.prescription_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if prescription_id.0 != aggregate_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event prescription_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            PrescriptionEvent::PrescriptionCreated(e) => {
                self.store.upsert(
                    clinic_id,
                    e.prescription_id,
                    PrescriptionReadModel {
                        prescription_id: e.prescription_id,
                        patient_id: e.patient_id,
                        consultation_ref: e.consultation_ref,
                        status: PrescriptionStatus::Prescrit,
                        prescribed_at: e.occurred_at,
                        lines: e
                            .lines
                            .into_iter()
                            .map(|l| PrescriptionLineReadModel {
                                line_no: l.line_no,
                                medication_id: l.medication_id,
                                medication_label: l.medication_label,
                                quantity_prescribed: l.quantity_prescribed,
                                quantity_dispensed: l.quantity_dispensed,
                            })
                            .collect(),
                    },
                );
            }
            PrescriptionEvent::QuantitiesDispensed(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.prescription_id) {
                    for delivery in &e.deliveries {
                        if let Some(line) =
                            rm.lines.iter_mut().find(|l| l.line_no == delivery.line_no)
                        {
                            line.quantity_dispensed += delivery.quantity;
                        }
                    }
                    rm.status = e.status;
                    self.store.upsert(clinic_id, e.prescription_id, rm);
                }
            }
            PrescriptionEvent::QuantitiesReversed(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.prescription_id) {
                    for delivery in &e.deliveries {
                        if let Some(line) =
                            rm.lines.iter_mut().find(|l| l.line_no == delivery.line_no)
                        {
                            line.quantity_dispensed -= delivery.quantity;
                        }
                    }
                    rm.status = e.status;
                    self.store.upsert(clinic_id, e.prescription_id, rm);
                }
            }
            PrescriptionEvent::PrescriptionCancelled(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.prescription_id) {
                    rm.status = PrescriptionStatus::Annule;
                    self.store.upsert(clinic_id, e.prescription_id, rm);
                }
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }
}
