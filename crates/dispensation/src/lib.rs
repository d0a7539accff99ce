//! `logiclinic-dispensation` — releasing medication against a prescription.

pub mod coverage;
pub mod dispensation;

pub use coverage::{Coverage, InsurerRef, PaymentSplit};
pub use dispensation::{
    AddDispensationLine, BeginDispensation, CancelDispensation, Dispensation,
    DispensationCancelled, DispensationCommand, DispensationEvent, DispensationFinalized,
    DispensationId, DispensationLine, DispensationStarted, DispensationStatus,
    DispensationValidated, FinalizeDispensation, LineAdded, ValidateDispensation,
};
