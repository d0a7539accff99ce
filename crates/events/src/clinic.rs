use logiclinic_core::ClinicId;

use crate::EventEnvelope;

/// Helper trait for clinic-scoped messages.
///
/// Marks types carrying a clinic id so infrastructure (workers, projection
/// loops) can filter or pin processing to one clinic as a second line of
/// isolation behind the store.
pub trait ClinicScoped {
    fn clinic_id(&self) -> ClinicId;
}

impl<E> ClinicScoped for EventEnvelope<E> {
    fn clinic_id(&self) -> ClinicId {
        self.clinic_id()
    }
}
