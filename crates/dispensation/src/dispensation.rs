use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use logiclinic_core::{
    Aggregate, AggregateId, AggregateRoot, BusinessRuleViolation, ClinicId, DomainError, Entity,
    Money, UserId,
};
use logiclinic_events::{Command, Event};
use logiclinic_prescriptions::{PatientId, PrescriptionId};
use logiclinic_stock::{LotId, MedicationId};

use crate::coverage::{Coverage, PaymentSplit};

/// Dispensation identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispensationId(pub AggregateId);

impl DispensationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DispensationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Dispensation lifecycle.
///
/// Forward-only: `en_cours -> terminee -> validee`, with cancellation
/// possible only while `en_cours`. `validee` and `annulee` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispensationStatus {
    EnCours,
    Terminee,
    Validee,
    Annulee,
}

/// One delivered line: which prescription line, which lot, how much, at what
/// price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensationLine {
    pub line_no: u32,
    pub prescription_line_no: u32,
    pub medication_id: MedicationId,
    pub medication_label: String,
    pub lot_id: LotId,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

impl Entity for DispensationLine {
    type Id = u32;

    fn id(&self) -> &Self::Id {
        &self.line_no
    }
}

/// Aggregate root: Dispensation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispensation {
    id: DispensationId,
    clinic_id: Option<ClinicId>,
    prescription_id: Option<PrescriptionId>,
    patient_id: Option<PatientId>,
    status: DispensationStatus,
    lines: Vec<DispensationLine>,
    montant_total: Money,
    montant_assurance: Money,
    montant_patient: Money,
    coverage: Option<Coverage>,
    version: u64,
    created: bool,
}

impl Dispensation {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DispensationId) -> Self {
        Self {
            id,
            clinic_id: None,
            prescription_id: None,
            patient_id: None,
            status: DispensationStatus::EnCours,
            lines: Vec::new(),
            montant_total: Money::zero(),
            montant_assurance: Money::zero(),
            montant_patient: Money::zero(),
            coverage: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DispensationId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn prescription_id(&self) -> Option<PrescriptionId> {
        self.prescription_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn status(&self) -> DispensationStatus {
        self.status
    }

    pub fn lines(&self) -> &[DispensationLine] {
        &self.lines
    }

    pub fn montant_total(&self) -> Money {
        self.montant_total
    }

    pub fn montant_assurance(&self) -> Money {
        self.montant_assurance
    }

    pub fn montant_patient(&self) -> Money {
        self.montant_patient
    }

    pub fn coverage(&self) -> Option<&Coverage> {
        self.coverage.as_ref()
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, DispensationStatus::EnCours)
    }

    /// Quantity taken from each lot, summed across lines.
    ///
    /// This is what finalize decrements (one guarded update per lot, even
    /// when several lines draw from the same lot).
    pub fn quantities_by_lot(&self) -> Vec<(LotId, i64)> {
        let mut totals: Vec<(LotId, i64)> = Vec::new();
        for line in &self.lines {
            match totals.iter_mut().find(|(lot, _)| *lot == line.lot_id) {
                Some((_, qty)) => *qty += line.quantity,
                None => totals.push((line.lot_id, line.quantity)),
            }
        }
        totals
    }

    /// Quantity delivered against each prescription line, summed across lines.
    pub fn deliveries_by_prescription_line(&self) -> Vec<(u32, i64)> {
        let mut totals: Vec<(u32, i64)> = Vec::new();
        for line in &self.lines {
            match totals
                .iter_mut()
                .find(|(no, _)| *no == line.prescription_line_no)
            {
                Some((_, qty)) => *qty += line.quantity,
                None => totals.push((line.prescription_line_no, line.quantity)),
            }
        }
        totals
    }
}

impl AggregateRoot for Dispensation {
    type Id = DispensationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: BeginDispensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginDispensation {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub dispensed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddDispensationLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDispensationLine {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub prescription_line_no: u32,
    pub medication_id: MedicationId,
    pub medication_label: String,
    pub lot_id: LotId,
    pub quantity: i64,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeDispensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeDispensation {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub coverage: Option<Coverage>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ValidateDispensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateDispensation {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelDispensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDispensation {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispensationCommand {
    BeginDispensation(BeginDispensation),
    AddDispensationLine(AddDispensationLine),
    FinalizeDispensation(FinalizeDispensation),
    ValidateDispensation(ValidateDispensation),
    CancelDispensation(CancelDispensation),
}

impl Command for DispensationCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            DispensationCommand::BeginDispensation(c) => c.dispensation_id.0,
            DispensationCommand::AddDispensationLine(c) => c.dispensation_id.0,
            DispensationCommand::FinalizeDispensation(c) => c.dispensation_id.0,
            DispensationCommand::ValidateDispensation(c) => c.dispensation_id.0,
            DispensationCommand::CancelDispensation(c) => c.dispensation_id.0,
        }
    }
}

/// Event: DispensationStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensationStarted {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub dispensed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub line: DispensationLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensationFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensationFinalized {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub montant_total: Money,
    pub montant_assurance: Money,
    pub montant_patient: Money,
    pub coverage: Option<Coverage>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensationValidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensationValidated {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensationCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensationCancelled {
    pub clinic_id: ClinicId,
    pub dispensation_id: DispensationId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispensationEvent {
    DispensationStarted(DispensationStarted),
    LineAdded(LineAdded),
    DispensationFinalized(DispensationFinalized),
    DispensationValidated(DispensationValidated),
    DispensationCancelled(DispensationCancelled),
}

impl Event for DispensationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DispensationEvent::DispensationStarted(_) => "dispensation.started",
            DispensationEvent::LineAdded(_) => "dispensation.line_added",
            DispensationEvent::DispensationFinalized(_) => "dispensation.finalized",
            DispensationEvent::DispensationValidated(_) => "dispensation.validated",
            DispensationEvent::DispensationCancelled(_) => "dispensation.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DispensationEvent::DispensationStarted(e) => e.occurred_at,
            DispensationEvent::LineAdded(e) => e.occurred_at,
            DispensationEvent::DispensationFinalized(e) => e.occurred_at,
            DispensationEvent::DispensationValidated(e) => e.occurred_at,
            DispensationEvent::DispensationCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Dispensation {
    type Command = DispensationCommand;
    type Event = DispensationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DispensationEvent::DispensationStarted(e) => {
                self.id = e.dispensation_id;
                self.clinic_id = Some(e.clinic_id);
                self.prescription_id = Some(e.prescription_id);
                self.patient_id = Some(e.patient_id);
                self.status = DispensationStatus::EnCours;
                self.lines.clear();
                self.created = true;
            }
            DispensationEvent::LineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            DispensationEvent::DispensationFinalized(e) => {
                self.montant_total = e.montant_total;
                self.montant_assurance = e.montant_assurance;
                self.montant_patient = e.montant_patient;
                self.coverage = e.coverage.clone();
                self.status = DispensationStatus::Terminee;
            }
            DispensationEvent::DispensationValidated(_) => {
                self.status = DispensationStatus::Validee;
            }
            DispensationEvent::DispensationCancelled(_) => {
                self.status = DispensationStatus::Annulee;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DispensationCommand::BeginDispensation(cmd) => self.handle_begin(cmd),
            DispensationCommand::AddDispensationLine(cmd) => self.handle_add_line(cmd),
            DispensationCommand::FinalizeDispensation(cmd) => self.handle_finalize(cmd),
            DispensationCommand::ValidateDispensation(cmd) => self.handle_validate(cmd),
            DispensationCommand::CancelDispensation(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Dispensation {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_dispensation_id(&self, dispensation_id: DispensationId) -> Result<(), DomainError> {
        if self.id != dispensation_id {
            return Err(DomainError::invariant("dispensation_id mismatch"));
        }
        Ok(())
    }

    fn handle_begin(&self, cmd: &BeginDispensation) -> Result<Vec<DispensationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("dispensation already exists"));
        }

        Ok(vec![DispensationEvent::DispensationStarted(
            DispensationStarted {
                clinic_id: cmd.clinic_id,
                dispensation_id: cmd.dispensation_id,
                prescription_id: cmd.prescription_id,
                patient_id: cmd.patient_id,
                dispensed_by: cmd.dispensed_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_add_line(
        &self,
        cmd: &AddDispensationLine,
    ) -> Result<Vec<DispensationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_dispensation_id(cmd.dispensation_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::rule(
                BusinessRuleViolation::InvalidStateTransition,
            ));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("delivered quantity must be positive"));
        }
        if cmd.unit_price.is_negative() {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        if cmd.medication_label.trim().is_empty() {
            return Err(DomainError::validation("medication label cannot be empty"));
        }

        let line_total = cmd
            .unit_price
            .checked_mul(cmd.quantity)
            .ok_or_else(|| DomainError::invariant("line total overflow"))?;

        let line = DispensationLine {
            line_no: (self.lines.len() as u32) + 1,
            prescription_line_no: cmd.prescription_line_no,
            medication_id: cmd.medication_id,
            medication_label: cmd.medication_label.clone(),
            lot_id: cmd.lot_id,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            line_total,
        };

        Ok(vec![DispensationEvent::LineAdded(LineAdded {
            clinic_id: cmd.clinic_id,
            dispensation_id: cmd.dispensation_id,
            line,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize(
        &self,
        cmd: &FinalizeDispensation,
    ) -> Result<Vec<DispensationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_dispensation_id(cmd.dispensation_id)?;

        if self.status != DispensationStatus::EnCours {
            return Err(DomainError::rule(
                BusinessRuleViolation::InvalidStateTransition,
            ));
        }
        if self.lines.is_empty() {
            return Err(DomainError::rule(BusinessRuleViolation::NothingToDispense));
        }
        if let Some(coverage) = &cmd.coverage {
            coverage.validate()?;
        }

        let mut montant_total = Money::zero();
        for line in &self.lines {
            montant_total = montant_total
                .checked_add(line.line_total)
                .ok_or_else(|| DomainError::invariant("dispensation total overflow"))?;
        }

        let split = PaymentSplit::compute(montant_total, cmd.coverage.as_ref());

        Ok(vec![DispensationEvent::DispensationFinalized(
            DispensationFinalized {
                clinic_id: cmd.clinic_id,
                dispensation_id: cmd.dispensation_id,
                montant_total: split.montant_total,
                montant_assurance: split.montant_assurance,
                montant_patient: split.montant_patient,
                coverage: cmd.coverage.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_validate(
        &self,
        cmd: &ValidateDispensation,
    ) -> Result<Vec<DispensationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_dispensation_id(cmd.dispensation_id)?;

        if self.status != DispensationStatus::Terminee {
            return Err(DomainError::rule(
                BusinessRuleViolation::InvalidStateTransition,
            ));
        }

        Ok(vec![DispensationEvent::DispensationValidated(
            DispensationValidated {
                clinic_id: cmd.clinic_id,
                dispensation_id: cmd.dispensation_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelDispensation,
    ) -> Result<Vec<DispensationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_dispensation_id(cmd.dispensation_id)?;

        // Cancellation is only possible before finalize, which is exactly why
        // cancelling never has to touch stock or prescription lines.
        if self.status != DispensationStatus::EnCours {
            return Err(DomainError::rule(
                BusinessRuleViolation::InvalidStateTransition,
            ));
        }

        Ok(vec![DispensationEvent::DispensationCancelled(
            DispensationCancelled {
                clinic_id: cmd.clinic_id,
                dispensation_id: cmd.dispensation_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::InsurerRef;
    use logiclinic_events::execute;

    fn test_clinic_id() -> ClinicId {
        ClinicId::new()
    }

    fn test_dispensation_id() -> DispensationId {
        DispensationId::new(AggregateId::new())
    }

    fn started_dispensation() -> (Dispensation, ClinicId, DispensationId) {
        let clinic_id = test_clinic_id();
        let dispensation_id = test_dispensation_id();
        let mut d = Dispensation::empty(dispensation_id);

        let cmd = BeginDispensation {
            clinic_id,
            dispensation_id,
            prescription_id: PrescriptionId::new(AggregateId::new()),
            patient_id: PatientId::new(AggregateId::new()),
            dispensed_by: UserId::new(),
            occurred_at: Utc::now(),
        };
        execute(&mut d, &DispensationCommand::BeginDispensation(cmd)).unwrap();

        (d, clinic_id, dispensation_id)
    }

    fn add_line(
        d: &mut Dispensation,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        quantity: i64,
        unit_price: i64,
    ) {
        let cmd = AddDispensationLine {
            clinic_id,
            dispensation_id,
            prescription_line_no: 1,
            medication_id: MedicationId::new(AggregateId::new()),
            medication_label: "Paracétamol 500mg".to_string(),
            lot_id: LotId::new(AggregateId::new()),
            quantity,
            unit_price: Money::from_francs(unit_price),
            occurred_at: Utc::now(),
        };
        execute(d, &DispensationCommand::AddDispensationLine(cmd)).unwrap();
    }

    fn finalize(
        d: &mut Dispensation,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        coverage: Option<Coverage>,
    ) -> Result<Vec<DispensationEvent>, DomainError> {
        execute(
            d,
            &DispensationCommand::FinalizeDispensation(FinalizeDispensation {
                clinic_id,
                dispensation_id,
                coverage,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn line_totals_accumulate_into_montant_total() {
        let (mut d, clinic, id) = started_dispensation();
        add_line(&mut d, clinic, id, 10, 500);
        add_line(&mut d, clinic, id, 21, 300);

        finalize(&mut d, clinic, id, None).unwrap();

        assert_eq!(d.status(), DispensationStatus::Terminee);
        assert_eq!(d.montant_total().francs(), 11_300);
        assert_eq!(d.montant_patient().francs(), 11_300);
        assert_eq!(d.montant_assurance().francs(), 0);
    }

    #[test]
    fn finalize_applies_tiers_payant_split() {
        let (mut d, clinic, id) = started_dispensation();
        add_line(&mut d, clinic, id, 20, 500);

        let coverage = Coverage {
            taux_couverture: 70,
            plafond: None,
            insurer: InsurerRef {
                insurer_id: AggregateId::new(),
                name: "MUGEF-CI".to_string(),
            },
        };
        finalize(&mut d, clinic, id, Some(coverage)).unwrap();

        assert_eq!(d.montant_total().francs(), 10_000);
        assert_eq!(d.montant_assurance().francs(), 7_000);
        assert_eq!(d.montant_patient().francs(), 3_000);
    }

    #[test]
    fn finalize_without_lines_is_rejected() {
        let (mut d, clinic, id) = started_dispensation();

        let err = finalize(&mut d, clinic, id, None).unwrap_err();
        assert_eq!(
            err,
            DomainError::BusinessRule(BusinessRuleViolation::NothingToDispense)
        );
        assert_eq!(d.status(), DispensationStatus::EnCours);
    }

    #[test]
    fn lines_cannot_be_added_after_finalize() {
        let (mut d, clinic, id) = started_dispensation();
        add_line(&mut d, clinic, id, 1, 100);
        finalize(&mut d, clinic, id, None).unwrap();

        let cmd = AddDispensationLine {
            clinic_id: clinic,
            dispensation_id: id,
            prescription_line_no: 1,
            medication_id: MedicationId::new(AggregateId::new()),
            medication_label: "Med".to_string(),
            lot_id: LotId::new(AggregateId::new()),
            quantity: 1,
            unit_price: Money::from_francs(100),
            occurred_at: Utc::now(),
        };
        let err = execute(&mut d, &DispensationCommand::AddDispensationLine(cmd)).unwrap_err();
        assert_eq!(
            err,
            DomainError::BusinessRule(BusinessRuleViolation::InvalidStateTransition)
        );
    }

    #[test]
    fn validate_only_from_terminee() {
        let (mut d, clinic, id) = started_dispensation();
        add_line(&mut d, clinic, id, 1, 100);

        let validate = DispensationCommand::ValidateDispensation(ValidateDispensation {
            clinic_id: clinic,
            dispensation_id: id,
            occurred_at: Utc::now(),
        });

        let err = execute(&mut d, &validate).unwrap_err();
        assert_eq!(
            err,
            DomainError::BusinessRule(BusinessRuleViolation::InvalidStateTransition)
        );

        finalize(&mut d, clinic, id, None).unwrap();
        execute(&mut d, &validate).unwrap();
        assert_eq!(d.status(), DispensationStatus::Validee);
    }

    #[test]
    fn cancel_only_while_en_cours() {
        let (mut d, clinic, id) = started_dispensation();
        add_line(&mut d, clinic, id, 1, 100);

        let cancel = DispensationCommand::CancelDispensation(CancelDispensation {
            clinic_id: clinic,
            dispensation_id: id,
            reason: Some("Patient parti".to_string()),
            occurred_at: Utc::now(),
        });

        let mut cancellable = d.clone();
        execute(&mut cancellable, &cancel).unwrap();
        assert_eq!(cancellable.status(), DispensationStatus::Annulee);

        finalize(&mut d, clinic, id, None).unwrap();
        let err = execute(&mut d, &cancel).unwrap_err();
        assert_eq!(
            err,
            DomainError::BusinessRule(BusinessRuleViolation::InvalidStateTransition)
        );
    }

    #[test]
    fn quantities_group_by_lot() {
        let (mut d, clinic, id) = started_dispensation();
        let lot = LotId::new(AggregateId::new());

        for qty in [5, 7] {
            let cmd = AddDispensationLine {
                clinic_id: clinic,
                dispensation_id: id,
                prescription_line_no: 1,
                medication_id: MedicationId::new(AggregateId::new()),
                medication_label: "Med".to_string(),
                lot_id: lot,
                quantity: qty,
                unit_price: Money::from_francs(100),
                occurred_at: Utc::now(),
            };
            execute(&mut d, &DispensationCommand::AddDispensationLine(cmd)).unwrap();
        }

        assert_eq!(d.quantities_by_lot(), vec![(lot, 12)]);
    }
}
