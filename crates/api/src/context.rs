use logiclinic_auth::Principal;
use logiclinic_core::ClinicId;

/// Clinic context for a request.
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClinicContext {
    clinic_id: ClinicId,
}

impl ClinicContext {
    pub fn new(clinic_id: ClinicId) -> Self {
        Self { clinic_id }
    }

    pub fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}
