//! Request/response DTOs and JSON mapping helpers.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use logiclinic_billing::Payer;
use logiclinic_dispensation::PaymentSplit;
use logiclinic_infra::pharmacy::AddLineOutcome;
use logiclinic_infra::projections::{
    DispensationReadModel, LotReadModel, PrescriptionReadModel, TariffSummaryEntry,
    TicketReadModel,
};

#[derive(Debug, Deserialize)]
pub struct ReceiveLotRequest {
    pub medication_id: Uuid,
    pub medication_label: String,
    pub lot_number: String,
    pub quantity: i64,
    /// Whole francs.
    pub unit_cost: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PrescriptionLineRequest {
    pub medication_id: Uuid,
    pub medication_label: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub patient_id: Uuid,
    pub consultation_ref: Option<String>,
    pub lines: Vec<PrescriptionLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct BeginDispensationRequest {
    pub prescription_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    pub prescription_line_no: u32,
    pub lot_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CoverageRequest {
    pub taux_couverture: u8,
    /// Whole francs.
    pub plafond: Option<i64>,
    pub insurer_id: Uuid,
    pub insurer_nom: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct FinalizeRequest {
    pub coverage: Option<CoverageRequest>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetTariffRequest {
    /// Whole francs.
    pub tarif: i64,
    pub unite: Option<String>,
}

pub fn lot_to_json(rm: &LotReadModel) -> JsonValue {
    json!({
        "id": rm.lot_id.to_string(),
        "medication_id": rm.medication_id.to_string(),
        "medication_label": rm.medication_label,
        "lot_number": rm.lot_number,
        "remaining": rm.remaining,
        "unit_cost": rm.unit_cost.francs(),
        "expires_at": rm.expires_at,
        "status": rm.status,
    })
}

pub fn prescription_to_json(rm: &PrescriptionReadModel) -> JsonValue {
    json!({
        "id": rm.prescription_id.to_string(),
        "patient_id": rm.patient_id.to_string(),
        "consultation_ref": rm.consultation_ref,
        "status": rm.status,
        "prescribed_at": rm.prescribed_at,
        "lines": rm.lines.iter().map(|l| json!({
            "line_no": l.line_no,
            "medication_id": l.medication_id.to_string(),
            "medication_label": l.medication_label,
            "quantity_prescribed": l.quantity_prescribed,
            "quantity_dispensed": l.quantity_dispensed,
            "remaining": l.remaining(),
        })).collect::<Vec<_>>(),
    })
}

pub fn dispensation_to_json(rm: &DispensationReadModel) -> JsonValue {
    json!({
        "id": rm.dispensation_id.to_string(),
        "prescription_id": rm.prescription_id.to_string(),
        "patient_id": rm.patient_id.to_string(),
        "status": rm.status,
        "montant_total": rm.montant_total.francs(),
        "montant_assurance": rm.montant_assurance.francs(),
        "montant_patient": rm.montant_patient.francs(),
        "lines": rm.lines.iter().map(|l| json!({
            "line_no": l.line_no,
            "prescription_line_no": l.prescription_line_no,
            "medication_label": l.medication_label,
            "lot_id": l.lot_id.to_string(),
            "quantity": l.quantity,
            "unit_price": l.unit_price.francs(),
            "line_total": l.line_total.francs(),
        })).collect::<Vec<_>>(),
    })
}

pub fn ticket_to_json(rm: &TicketReadModel) -> JsonValue {
    let (payeur_type, payeur_id, payeur_nom) = match &rm.payer {
        Payer::Patient => ("patient", None, None),
        Payer::Assurance {
            payeur_id,
            payeur_nom,
        } => (
            "assurance",
            Some(payeur_id.to_string()),
            Some(payeur_nom.clone()),
        ),
    };

    json!({
        "id": rm.ticket_id.to_string(),
        "patient_id": rm.patient_id.to_string(),
        "service_origine": rm.service_origine,
        "reference_origine": rm.reference_origine,
        "type_acte": rm.type_acte,
        "montant": rm.montant.francs(),
        "payeur_type": payeur_type,
        "payeur_id": payeur_id,
        "payeur_nom": payeur_nom,
        "statut": rm.statut,
    })
}

pub fn split_to_json(split: &PaymentSplit) -> JsonValue {
    json!({
        "montant_total": split.montant_total.francs(),
        "montant_assurance": split.montant_assurance.francs(),
        "montant_patient": split.montant_patient.francs(),
    })
}

pub fn add_line_outcome_to_json(outcome: &AddLineOutcome) -> JsonValue {
    json!({
        "warning": outcome.expiry_warning.map(|w| json!({
            "kind": "near_expiry",
            "lot_id": w.lot_id.to_string(),
            "days_to_expiry": w.days_to_expiry,
        })),
    })
}

pub fn tariff_summary_to_json(entry: &TariffSummaryEntry) -> JsonValue {
    json!({
        "service_id": entry.service_id.to_string(),
        "code": entry.code,
        "nom": entry.nom,
        "tarif_defaut": entry.tarif_defaut.francs(),
        "tarif_clinique": entry.tarif_clinique.map(|t| t.francs()),
        "tarif_applique": entry.tarif_applique.francs(),
        "source": entry.source,
        "unite": entry.unite,
    })
}
