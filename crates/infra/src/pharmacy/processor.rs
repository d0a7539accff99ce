//! Request-per-operation orchestration of the dispensing workflow.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use logiclinic_billing::BillingTicketId;
use logiclinic_core::{
    Aggregate, AggregateId, AggregateRoot, BusinessRuleViolation, ClinicId, DomainError, UserId,
};
use logiclinic_dispensation::{
    AddDispensationLine, BeginDispensation, CancelDispensation, Coverage, Dispensation,
    DispensationCommand, DispensationEvent, DispensationId, FinalizeDispensation, PaymentSplit,
    ValidateDispensation,
};
use logiclinic_events::{EventBus, EventEnvelope};
use logiclinic_prescriptions::{
    LineDelivery, Prescription, PrescriptionCommand, PrescriptionId, PrescriptionStatus,
    RecordDispensation, ReverseDispensation,
};
use logiclinic_pricing::ServiceId;
use logiclinic_stock::{DecrementStock, Lot, LotCommand, LotId, RestoreStock};

use crate::aggregate_types;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{TariffReadModel, TariffResolver};
use crate::read_model::ClinicStore;

use super::policy::DispensingPolicy;
use super::ticket_emitter::{TicketEmitError, TicketEmitter};

/// Workflow-level error: either a dispatch/domain failure that aborted the
/// operation, or a ticket emission failure that did NOT undo the validated
/// dispensation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Tickets(#[from] TicketEmitError),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Dispatch(e) => e.code(),
            WorkflowError::Tickets(e) => e.code(),
        }
    }
}

/// Non-blocking warning raised when an allocated lot expires soon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryWarning {
    pub lot_id: LotId,
    pub days_to_expiry: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddLineOutcome {
    pub expiry_warning: Option<ExpiryWarning>,
}

/// Orchestrates begin / add_line / finalize / validate / cancel.
///
/// Each call is one request-scoped unit of work; there is no long-lived
/// in-process state beyond the injected policy. Cross-aggregate effects are
/// sequenced so that every failure path leaves lots and prescription lines
/// at their pre-operation values.
pub struct DispensationProcessor<S, B, TS>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    TS: ClinicStore<ServiceId, TariffReadModel>,
{
    dispatcher: CommandDispatcher<S, B>,
    resolver: TariffResolver<TS>,
    emitter: Arc<TicketEmitter<S, B>>,
    policy: DispensingPolicy,
}

impl<S, B, TS> DispensationProcessor<S, B, TS>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    TS: ClinicStore<ServiceId, TariffReadModel>,
{
    pub fn new(
        dispatcher: CommandDispatcher<S, B>,
        resolver: TariffResolver<TS>,
        emitter: Arc<TicketEmitter<S, B>>,
        policy: DispensingPolicy,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            emitter,
            policy,
        }
    }

    pub fn policy(&self) -> DispensingPolicy {
        self.policy
    }

    /// Start dispensing against an active, non-stale prescription.
    pub fn begin(
        &self,
        clinic_id: ClinicId,
        prescription_id: PrescriptionId,
        dispensed_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<DispensationId, DispatchError> {
        let prescription = self.load_prescription(clinic_id, prescription_id)?;

        if prescription.status() == PrescriptionStatus::Annule {
            return Err(DomainError::rule(BusinessRuleViolation::PrescriptionCancelled).into());
        }
        if prescription.is_stale(now, self.policy.max_prescription_age_days) {
            return Err(DomainError::rule(BusinessRuleViolation::PrescriptionTooOld).into());
        }
        if !prescription.has_open_lines() {
            return Err(DomainError::rule(BusinessRuleViolation::NothingToDispense).into());
        }

        let patient_id = prescription
            .patient_id()
            .ok_or_else(|| DomainError::invariant("prescription has no patient"))?;

        let aggregate_id = AggregateId::new();
        let dispensation_id = DispensationId::new(aggregate_id);

        self.dispatcher.dispatch::<Dispensation>(
            clinic_id,
            aggregate_id,
            aggregate_types::DISPENSATION,
            DispensationCommand::BeginDispensation(BeginDispensation {
                clinic_id,
                dispensation_id,
                prescription_id,
                patient_id,
                dispensed_by,
                occurred_at: now,
            }),
            |_clinic, id| Dispensation::empty(DispensationId::new(id)),
        )?;

        tracing::info!(
            clinic_id = %clinic_id,
            prescription_id = %prescription_id,
            dispensation_id = %dispensation_id,
            "dispensation started"
        );

        Ok(dispensation_id)
    }

    /// Allocate a quantity from a lot against one prescription line.
    ///
    /// Validates remaining prescription quantity (including lines already
    /// staged on this dispensation), lot availability and expiry, and prices
    /// the line through the tariff resolver. The availability answer here is
    /// advisory; the binding check happens again at finalize, inside the
    /// guarded decrement.
    pub fn add_line(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        prescription_line_no: u32,
        lot_id: LotId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<AddLineOutcome, DispatchError> {
        let dispensation = self.load_dispensation(clinic_id, dispensation_id)?;
        let prescription_id = dispensation
            .prescription_id()
            .ok_or_else(|| DomainError::invariant("dispensation has no prescription"))?;
        let prescription = self.load_prescription(clinic_id, prescription_id)?;

        let line = prescription
            .line(prescription_line_no)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unknown prescription line {prescription_line_no}"
                ))
            })?;

        let staged: i64 = dispensation
            .deliveries_by_prescription_line()
            .iter()
            .find(|(no, _)| *no == prescription_line_no)
            .map(|(_, qty)| *qty)
            .unwrap_or(0);
        if staged + quantity > line.remaining() {
            return Err(DomainError::invariant(
                "delivered quantity exceeds remaining prescribed quantity",
            )
            .into());
        }

        let lot = self.load_lot(clinic_id, lot_id)?;
        if lot.medication_id() != Some(line.medication_id) {
            return Err(
                DomainError::validation("lot does not hold the prescribed medication").into(),
            );
        }

        let availability = lot.availability(quantity, now);
        if availability.expired {
            return Err(DomainError::LotExpired.into());
        }
        if !availability.sufficient {
            return Err(DomainError::insufficient_stock(quantity, lot.remaining()).into());
        }

        let tariff = self
            .resolver
            .resolve(clinic_id, ServiceId::new(line.medication_id.0))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "no tariff configured for medication {}",
                    line.medication_id
                ))
            })?;

        self.dispatcher.dispatch::<Dispensation>(
            clinic_id,
            dispensation_id.0,
            aggregate_types::DISPENSATION,
            DispensationCommand::AddDispensationLine(AddDispensationLine {
                clinic_id,
                dispensation_id,
                prescription_line_no,
                medication_id: line.medication_id,
                medication_label: line.medication_label.clone(),
                lot_id,
                quantity,
                unit_price: tariff.tarif,
                occurred_at: now,
            }),
            |_clinic, id| Dispensation::empty(DispensationId::new(id)),
        )?;

        let expiry_warning = availability
            .days_to_expiry
            .filter(|days| *days > 0 && *days < self.policy.near_expiry_warning_days)
            .map(|days_to_expiry| ExpiryWarning {
                lot_id,
                days_to_expiry,
            });

        Ok(AddLineOutcome { expiry_warning })
    }

    /// Finalize: decrement every allocated lot, record the deliveries on the
    /// prescription, then compute the payment split and transition to
    /// `terminee`.
    ///
    /// Decrements are re-validated inside each lot aggregate and guarded by
    /// the expected-version append, so a concurrent dispensation that
    /// drained a lot between add_line and finalize makes this fail with
    /// `InsufficientStock`. Any decrements already applied in this call are
    /// compensated with `RestoreStock` before the error is returned: no
    /// partial decrement survives a failed finalize.
    pub fn finalize(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        coverage: Option<Coverage>,
        recorded_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<PaymentSplit, DispatchError> {
        let dispensation = self.load_dispensation(clinic_id, dispensation_id)?;

        let finalize_cmd = DispensationCommand::FinalizeDispensation(FinalizeDispensation {
            clinic_id,
            dispensation_id,
            coverage,
            occurred_at: now,
        });

        // Dry-run the state transition before touching shared stock.
        Aggregate::handle(&dispensation, &finalize_cmd).map_err(DispatchError::from)?;

        let reference = dispensation_id.to_string();
        let prescription_id = dispensation
            .prescription_id()
            .ok_or_else(|| DomainError::invariant("dispensation has no prescription"))?;

        // 1) Guarded decrement per lot.
        let mut decremented: Vec<(LotId, i64)> = Vec::new();
        for (lot_id, quantity) in dispensation.quantities_by_lot() {
            let result = self.dispatcher.dispatch::<Lot>(
                clinic_id,
                lot_id.0,
                aggregate_types::LOT,
                LotCommand::DecrementStock(DecrementStock {
                    clinic_id,
                    lot_id,
                    quantity,
                    reason: format!("Dispensation {reference}"),
                    reference: reference.clone(),
                    recorded_by,
                    occurred_at: now,
                }),
                |_clinic, id| Lot::empty(LotId::new(id)),
            );

            if let Err(e) = result {
                self.restore_lots(clinic_id, &decremented, &reference, recorded_by, now);
                return Err(e);
            }
            decremented.push((lot_id, quantity));
        }

        // 2) Record the deliveries on the prescription (re-validates the
        //    remaining quantities under optimistic concurrency).
        let deliveries: Vec<LineDelivery> = dispensation
            .deliveries_by_prescription_line()
            .into_iter()
            .map(|(line_no, quantity)| LineDelivery { line_no, quantity })
            .collect();

        let record = self.dispatcher.dispatch::<Prescription>(
            clinic_id,
            prescription_id.0,
            aggregate_types::PRESCRIPTION,
            PrescriptionCommand::RecordDispensation(RecordDispensation {
                clinic_id,
                prescription_id,
                deliveries: deliveries.clone(),
                reference: reference.clone(),
                occurred_at: now,
            }),
            |_clinic, id| Prescription::empty(PrescriptionId::new(id)),
        );
        if let Err(e) = record {
            self.restore_lots(clinic_id, &decremented, &reference, recorded_by, now);
            return Err(e);
        }

        // 3) Transition the dispensation itself.
        let committed = match self.dispatcher.dispatch::<Dispensation>(
            clinic_id,
            dispensation_id.0,
            aggregate_types::DISPENSATION,
            finalize_cmd,
            |_clinic, id| Dispensation::empty(DispensationId::new(id)),
        ) {
            Ok(committed) => committed,
            Err(e) => {
                // The dispensation was mutated concurrently (a cancel won the
                // race). Undo both side effects.
                self.restore_lots(clinic_id, &decremented, &reference, recorded_by, now);
                self.reverse_prescription(clinic_id, prescription_id, deliveries, &reference, now);
                return Err(e);
            }
        };

        let split = committed
            .iter()
            .find_map(|stored| {
                match serde_json::from_value::<DispensationEvent>(stored.payload.clone()) {
                    Ok(DispensationEvent::DispensationFinalized(e)) => Some(PaymentSplit {
                        montant_total: e.montant_total,
                        montant_assurance: e.montant_assurance,
                        montant_patient: e.montant_patient,
                    }),
                    _ => None,
                }
            })
            .ok_or_else(|| {
                DispatchError::Deserialize("finalize produced no DispensationFinalized".into())
            })?;

        tracing::info!(
            clinic_id = %clinic_id,
            dispensation_id = %dispensation_id,
            montant_total = split.montant_total.francs(),
            montant_assurance = split.montant_assurance.francs(),
            montant_patient = split.montant_patient.francs(),
            "dispensation finalized"
        );

        Ok(split)
    }

    /// Validate a finalized dispensation and emit its billing tickets.
    ///
    /// A ticket emission failure is surfaced as `TICKET_CREATION_FAILED` but
    /// the dispensation stays validated; the drafts wait in the emitter's
    /// retry queue.
    pub fn validate(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillingTicketId>, WorkflowError> {
        self.dispatcher.dispatch::<Dispensation>(
            clinic_id,
            dispensation_id.0,
            aggregate_types::DISPENSATION,
            DispensationCommand::ValidateDispensation(ValidateDispensation {
                clinic_id,
                dispensation_id,
                occurred_at: now,
            }),
            |_clinic, id| Dispensation::empty(DispensationId::new(id)),
        )?;

        let dispensation = self.load_dispensation(clinic_id, dispensation_id)?;
        let tickets = self.emitter.emit(clinic_id, &dispensation, now)?;

        tracing::info!(
            clinic_id = %clinic_id,
            dispensation_id = %dispensation_id,
            tickets = tickets.len(),
            "dispensation validated"
        );

        Ok(tickets)
    }

    /// Cancel a dispensation still in progress. No stock or prescription
    /// mutation happens here; nothing was decremented yet.
    pub fn cancel(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch::<Dispensation>(
            clinic_id,
            dispensation_id.0,
            aggregate_types::DISPENSATION,
            DispensationCommand::CancelDispensation(CancelDispensation {
                clinic_id,
                dispensation_id,
                reason,
                occurred_at: now,
            }),
            |_clinic, id| Dispensation::empty(DispensationId::new(id)),
        )?;
        Ok(())
    }

    fn load_prescription(
        &self,
        clinic_id: ClinicId,
        prescription_id: PrescriptionId,
    ) -> Result<Prescription, DispatchError> {
        let prescription = self.dispatcher.rehydrate::<Prescription>(
            clinic_id,
            prescription_id.0,
            |_clinic, id| Prescription::empty(PrescriptionId::new(id)),
        )?;
        if prescription.version() == 0 {
            return Err(DispatchError::not_found());
        }
        Ok(prescription)
    }

    fn load_dispensation(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
    ) -> Result<Dispensation, DispatchError> {
        let dispensation = self.dispatcher.rehydrate::<Dispensation>(
            clinic_id,
            dispensation_id.0,
            |_clinic, id| Dispensation::empty(DispensationId::new(id)),
        )?;
        if dispensation.version() == 0 {
            return Err(DispatchError::not_found());
        }
        Ok(dispensation)
    }

    fn load_lot(&self, clinic_id: ClinicId, lot_id: LotId) -> Result<Lot, DispatchError> {
        let lot = self
            .dispatcher
            .rehydrate::<Lot>(clinic_id, lot_id.0, |_clinic, id| Lot::empty(LotId::new(id)))?;
        if lot.version() == 0 {
            return Err(DispatchError::not_found());
        }
        Ok(lot)
    }

    /// Compensating restores for decrements applied by a failed finalize.
    ///
    /// Restore failures are logged and skipped; the movement journal keeps
    /// enough information to reconcile manually.
    fn restore_lots(
        &self,
        clinic_id: ClinicId,
        decremented: &[(LotId, i64)],
        reference: &str,
        recorded_by: UserId,
        now: DateTime<Utc>,
    ) {
        for (lot_id, quantity) in decremented {
            let result = self.dispatcher.dispatch::<Lot>(
                clinic_id,
                lot_id.0,
                aggregate_types::LOT,
                LotCommand::RestoreStock(RestoreStock {
                    clinic_id,
                    lot_id: *lot_id,
                    quantity: *quantity,
                    reason: format!("Annulation finalisation {reference}"),
                    reference: reference.to_string(),
                    recorded_by,
                    occurred_at: now,
                }),
                |_clinic, id| Lot::empty(LotId::new(id)),
            );
            if let Err(e) = result {
                tracing::error!(
                    clinic_id = %clinic_id,
                    lot_id = %lot_id,
                    quantity,
                    error = %e,
                    "compensating stock restore failed"
                );
            }
        }
    }

    fn reverse_prescription(
        &self,
        clinic_id: ClinicId,
        prescription_id: PrescriptionId,
        deliveries: Vec<LineDelivery>,
        reference: &str,
        now: DateTime<Utc>,
    ) {
        let result = self.dispatcher.dispatch::<Prescription>(
            clinic_id,
            prescription_id.0,
            aggregate_types::PRESCRIPTION,
            PrescriptionCommand::ReverseDispensation(ReverseDispensation {
                clinic_id,
                prescription_id,
                deliveries,
                reference: reference.to_string(),
                occurred_at: now,
            }),
            |_clinic, id| Prescription::empty(PrescriptionId::new(id)),
        );
        if let Err(e) = result {
            tracing::error!(
                clinic_id = %clinic_id,
                prescription_id = %prescription_id,
                error = %e,
                "compensating prescription reversal failed"
            );
        }
    }
}
