//! `logiclinic-prescriptions` — prescription tracking (prescribed vs dispensed).

pub mod prescription;

pub use prescription::{
    derive_status, CancelPrescription, CreatePrescription, LineDelivery, PatientId,
    Prescription, PrescriptionCancelled, PrescriptionCommand, PrescriptionCreated,
    PrescriptionEvent, PrescriptionId, PrescriptionLine, PrescriptionLineSpec,
    PrescriptionStatus, QuantitiesDispensed, QuantitiesReversed, RecordDispensation,
    ReverseDispensation,
};
