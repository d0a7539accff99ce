//! Default tariffs for billable services, seeded at startup.

use serde::{Deserialize, Serialize};

use logiclinic_core::{AggregateId, Money};

/// Billable service identifier.
///
/// Doubles as the aggregate id of the clinic's tariff override stream, so
/// each (clinic, service) pair has exactly one pricing history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub AggregateId);

impl ServiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One entry of the billable-service catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableService {
    pub service_id: ServiceId,
    pub code: String,
    pub nom: String,
    pub tarif_defaut: Money,
    pub unite: String,
}

/// System-wide default tariffs.
///
/// The catalog is reference data: loaded once at startup and only read
/// afterwards. Clinic-specific overrides live in their own aggregate streams.
#[derive(Debug, Clone, Default)]
pub struct DefaultTariffCatalog {
    services: Vec<BillableService>,
}

impl DefaultTariffCatalog {
    pub fn new(services: Vec<BillableService>) -> Self {
        Self { services }
    }

    pub fn get(&self, service_id: ServiceId) -> Option<&BillableService> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    pub fn list(&self) -> &[BillableService] {
        &self.services
    }
}
