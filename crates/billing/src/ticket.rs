use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use logiclinic_core::{
    Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, Money, UserId,
};
use logiclinic_dispensation::{Dispensation, DispensationStatus};
use logiclinic_events::{Command, Event};
use logiclinic_prescriptions::PatientId;

/// Billing ticket identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingTicketId(pub AggregateId);

impl BillingTicketId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BillingTicketId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Who owes the amount on a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "payeur_type", rename_all = "lowercase")]
pub enum Payer {
    Patient,
    Assurance {
        payeur_id: AggregateId,
        payeur_nom: String,
    },
}

/// Payer discriminant, as rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayerType {
    Patient,
    Assurance,
}

impl Payer {
    pub fn payer_type(&self) -> PayerType {
        match self {
            Payer::Patient => PayerType::Patient,
            Payer::Assurance { .. } => PayerType::Assurance,
        }
    }
}

/// Ticket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    EnAttente,
    Regle,
    Annule,
}

/// Aggregate root: BillingTicket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingTicket {
    id: BillingTicketId,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    service_origine: String,
    reference_origine: String,
    type_acte: String,
    montant: Money,
    payer: Option<Payer>,
    status: TicketStatus,
    version: u64,
    created: bool,
}

impl BillingTicket {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BillingTicketId) -> Self {
        Self {
            id,
            clinic_id: None,
            patient_id: None,
            service_origine: String::new(),
            reference_origine: String::new(),
            type_acte: String::new(),
            montant: Money::zero(),
            payer: None,
            status: TicketStatus::EnAttente,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BillingTicketId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn montant(&self) -> Money {
        self.montant
    }

    pub fn payer(&self) -> Option<&Payer> {
        self.payer.as_ref()
    }

    pub fn status(&self) -> TicketStatus {
        self.status
    }

    pub fn reference_origine(&self) -> &str {
        &self.reference_origine
    }
}

impl AggregateRoot for BillingTicket {
    type Id = BillingTicketId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenTicket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTicket {
    pub clinic_id: ClinicId,
    pub ticket_id: BillingTicketId,
    pub patient_id: PatientId,
    /// Originating clinical service, e.g. "pharmacie".
    pub service_origine: String,
    /// Origin reference (dispensation id).
    pub reference_origine: String,
    pub type_acte: String,
    pub montant: Money,
    pub payer: Payer,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SettleTicket (cash desk marks the ticket paid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleTicket {
    pub clinic_id: ClinicId,
    pub ticket_id: BillingTicketId,
    pub settled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTicket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTicket {
    pub clinic_id: ClinicId,
    pub ticket_id: BillingTicketId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketCommand {
    OpenTicket(OpenTicket),
    SettleTicket(SettleTicket),
    CancelTicket(CancelTicket),
}

impl Command for TicketCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            TicketCommand::OpenTicket(c) => c.ticket_id.0,
            TicketCommand::SettleTicket(c) => c.ticket_id.0,
            TicketCommand::CancelTicket(c) => c.ticket_id.0,
        }
    }
}

/// Event: TicketOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketOpened {
    pub clinic_id: ClinicId,
    pub ticket_id: BillingTicketId,
    pub patient_id: PatientId,
    pub service_origine: String,
    pub reference_origine: String,
    pub type_acte: String,
    pub montant: Money,
    pub payer: Payer,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TicketSettled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSettled {
    pub clinic_id: ClinicId,
    pub ticket_id: BillingTicketId,
    pub settled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TicketCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCancelled {
    pub clinic_id: ClinicId,
    pub ticket_id: BillingTicketId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketEvent {
    TicketOpened(TicketOpened),
    TicketSettled(TicketSettled),
    TicketCancelled(TicketCancelled),
}

impl Event for TicketEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TicketEvent::TicketOpened(_) => "billing.ticket.opened",
            TicketEvent::TicketSettled(_) => "billing.ticket.settled",
            TicketEvent::TicketCancelled(_) => "billing.ticket.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TicketEvent::TicketOpened(e) => e.occurred_at,
            TicketEvent::TicketSettled(e) => e.occurred_at,
            TicketEvent::TicketCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for BillingTicket {
    type Command = TicketCommand;
    type Event = TicketEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TicketEvent::TicketOpened(e) => {
                self.id = e.ticket_id;
                self.clinic_id = Some(e.clinic_id);
                self.patient_id = Some(e.patient_id);
                self.service_origine = e.service_origine.clone();
                self.reference_origine = e.reference_origine.clone();
                self.type_acte = e.type_acte.clone();
                self.montant = e.montant;
                self.payer = Some(e.payer.clone());
                self.status = TicketStatus::EnAttente;
                self.created = true;
            }
            TicketEvent::TicketSettled(_) => {
                self.status = TicketStatus::Regle;
            }
            TicketEvent::TicketCancelled(_) => {
                self.status = TicketStatus::Annule;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TicketCommand::OpenTicket(cmd) => self.handle_open(cmd),
            TicketCommand::SettleTicket(cmd) => self.handle_settle(cmd),
            TicketCommand::CancelTicket(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl BillingTicket {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_ticket_id(&self, ticket_id: BillingTicketId) -> Result<(), DomainError> {
        if self.id != ticket_id {
            return Err(DomainError::invariant("ticket_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenTicket) -> Result<Vec<TicketEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("ticket already exists"));
        }
        if !cmd.montant.is_positive() {
            return Err(DomainError::validation("ticket amount must be positive"));
        }
        if cmd.service_origine.trim().is_empty() {
            return Err(DomainError::validation("originating service cannot be empty"));
        }
        if cmd.reference_origine.trim().is_empty() {
            return Err(DomainError::validation("origin reference cannot be empty"));
        }

        Ok(vec![TicketEvent::TicketOpened(TicketOpened {
            clinic_id: cmd.clinic_id,
            ticket_id: cmd.ticket_id,
            patient_id: cmd.patient_id,
            service_origine: cmd.service_origine.clone(),
            reference_origine: cmd.reference_origine.clone(),
            type_acte: cmd.type_acte.clone(),
            montant: cmd.montant,
            payer: cmd.payer.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_settle(&self, cmd: &SettleTicket) -> Result<Vec<TicketEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_ticket_id(cmd.ticket_id)?;

        if self.status != TicketStatus::EnAttente {
            return Err(DomainError::invariant(
                "only pending tickets can be settled",
            ));
        }

        Ok(vec![TicketEvent::TicketSettled(TicketSettled {
            clinic_id: cmd.clinic_id,
            ticket_id: cmd.ticket_id,
            settled_by: cmd.settled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTicket) -> Result<Vec<TicketEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_ticket_id(cmd.ticket_id)?;

        if self.status != TicketStatus::EnAttente {
            return Err(DomainError::invariant(
                "only pending tickets can be cancelled",
            ));
        }

        Ok(vec![TicketEvent::TicketCancelled(TicketCancelled {
            clinic_id: cmd.clinic_id,
            ticket_id: cmd.ticket_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Draft of a ticket to open for a validated dispensation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketDraft {
    pub patient_id: PatientId,
    pub reference_origine: String,
    pub type_acte: String,
    pub montant: Money,
    pub payer: Payer,
}

/// The once-per-payer emission rule.
///
/// A validated dispensation yields at most two tickets: one for the patient
/// share, one for the insurer share. Zero amounts yield no ticket, and the
/// insurer ticket requires an attached insurer.
pub fn tickets_for(dispensation: &Dispensation) -> Vec<TicketDraft> {
    let Some(patient_id) = dispensation.patient_id() else {
        return Vec::new();
    };
    if dispensation.status() != DispensationStatus::Validee {
        return Vec::new();
    }

    let reference = dispensation.id_typed().to_string();
    let acte_detail = dispensation
        .lines()
        .iter()
        .map(|l| format!("{} (x{})", l.medication_label, l.quantity))
        .collect::<Vec<_>>()
        .join(", ");

    let mut drafts = Vec::new();

    if dispensation.montant_patient().is_positive() {
        drafts.push(TicketDraft {
            patient_id,
            reference_origine: reference.clone(),
            type_acte: format!("Dispensation (Patient): {acte_detail}"),
            montant: dispensation.montant_patient(),
            payer: Payer::Patient,
        });
    }

    if dispensation.montant_assurance().is_positive() {
        if let Some(coverage) = dispensation.coverage() {
            drafts.push(TicketDraft {
                patient_id,
                reference_origine: reference,
                type_acte: format!("Dispensation (Assurance): {acte_detail}"),
                montant: dispensation.montant_assurance(),
                payer: Payer::Assurance {
                    payeur_id: coverage.insurer.insurer_id,
                    payeur_nom: coverage.insurer.name.clone(),
                },
            });
        }
    }

    drafts
}

#[cfg(test)]
mod tests {
    use super::*;
    use logiclinic_dispensation::{
        AddDispensationLine, BeginDispensation, Coverage, DispensationCommand, DispensationId,
        FinalizeDispensation, InsurerRef, ValidateDispensation,
    };
    use logiclinic_events::execute;
    use logiclinic_prescriptions::PrescriptionId;
    use logiclinic_stock::{LotId, MedicationId};

    fn validated_dispensation(coverage: Option<Coverage>) -> Dispensation {
        let clinic_id = ClinicId::new();
        let dispensation_id = DispensationId::new(AggregateId::new());
        let mut d = Dispensation::empty(dispensation_id);
        let now = Utc::now();

        execute(
            &mut d,
            &DispensationCommand::BeginDispensation(BeginDispensation {
                clinic_id,
                dispensation_id,
                prescription_id: PrescriptionId::new(AggregateId::new()),
                patient_id: PatientId::new(AggregateId::new()),
                dispensed_by: UserId::new(),
                occurred_at: now,
            }),
        )
        .unwrap();
        execute(
            &mut d,
            &DispensationCommand::AddDispensationLine(AddDispensationLine {
                clinic_id,
                dispensation_id,
                prescription_line_no: 1,
                medication_id: MedicationId::new(AggregateId::new()),
                medication_label: "Paracétamol".to_string(),
                lot_id: LotId::new(AggregateId::new()),
                quantity: 10,
                unit_price: Money::from_francs(500),
                occurred_at: now,
            }),
        )
        .unwrap();
        execute(
            &mut d,
            &DispensationCommand::FinalizeDispensation(FinalizeDispensation {
                clinic_id,
                dispensation_id,
                coverage,
                occurred_at: now,
            }),
        )
        .unwrap();
        execute(
            &mut d,
            &DispensationCommand::ValidateDispensation(ValidateDispensation {
                clinic_id,
                dispensation_id,
                occurred_at: now,
            }),
        )
        .unwrap();

        d
    }

    fn mugef(taux: u8) -> Coverage {
        Coverage {
            taux_couverture: taux,
            plafond: None,
            insurer: InsurerRef {
                insurer_id: AggregateId::new(),
                name: "MUGEF-CI".to_string(),
            },
        }
    }

    #[test]
    fn uncovered_dispensation_yields_one_patient_ticket() {
        let d = validated_dispensation(None);
        let drafts = tickets_for(&d);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].payer, Payer::Patient);
        assert_eq!(drafts[0].montant.francs(), 5_000);
        assert!(drafts[0].type_acte.contains("Paracétamol (x10)"));
    }

    #[test]
    fn covered_dispensation_yields_patient_and_insurer_tickets() {
        let d = validated_dispensation(Some(mugef(70)));
        let drafts = tickets_for(&d);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].payer.payer_type(), PayerType::Patient);
        assert_eq!(drafts[0].montant.francs(), 1_500);
        match &drafts[1].payer {
            Payer::Assurance { payeur_nom, .. } => assert_eq!(payeur_nom, "MUGEF-CI"),
            other => panic!("expected insurer payer, got {other:?}"),
        }
        assert_eq!(drafts[1].montant.francs(), 3_500);
    }

    #[test]
    fn full_coverage_yields_only_the_insurer_ticket() {
        let d = validated_dispensation(Some(mugef(100)));
        let drafts = tickets_for(&d);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].payer.payer_type(), PayerType::Assurance);
        assert_eq!(drafts[0].montant.francs(), 5_000);
    }

    #[test]
    fn open_then_settle_lifecycle() {
        let clinic_id = ClinicId::new();
        let ticket_id = BillingTicketId::new(AggregateId::new());
        let mut ticket = BillingTicket::empty(ticket_id);

        execute(
            &mut ticket,
            &TicketCommand::OpenTicket(OpenTicket {
                clinic_id,
                ticket_id,
                patient_id: PatientId::new(AggregateId::new()),
                service_origine: "pharmacie".to_string(),
                reference_origine: "disp-456".to_string(),
                type_acte: "Dispensation (Patient): Paracétamol (x10)".to_string(),
                montant: Money::from_francs(5_000),
                payer: Payer::Patient,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(ticket.status(), TicketStatus::EnAttente);

        execute(
            &mut ticket,
            &TicketCommand::SettleTicket(SettleTicket {
                clinic_id,
                ticket_id,
                settled_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(ticket.status(), TicketStatus::Regle);

        // Settling twice is rejected.
        let err = execute(
            &mut ticket,
            &TicketCommand::SettleTicket(SettleTicket {
                clinic_id,
                ticket_id,
                settled_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("pending") => {}
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn zero_amount_ticket_is_rejected() {
        let clinic_id = ClinicId::new();
        let ticket_id = BillingTicketId::new(AggregateId::new());
        let mut ticket = BillingTicket::empty(ticket_id);

        let err = execute(
            &mut ticket,
            &TicketCommand::OpenTicket(OpenTicket {
                clinic_id,
                ticket_id,
                patient_id: PatientId::new(AggregateId::new()),
                service_origine: "pharmacie".to_string(),
                reference_origine: "disp-456".to_string(),
                type_acte: "Dispensation".to_string(),
                montant: Money::zero(),
                payer: Payer::Patient,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("positive") => {}
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
