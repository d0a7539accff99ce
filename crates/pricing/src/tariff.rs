use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use logiclinic_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, Money, UserId};
use logiclinic_events::{Command, Event};

use crate::catalog::ServiceId;

/// Where a resolved tariff came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TariffSource {
    Clinic,
    Default,
}

/// The tariff applied to a service for one clinic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTariff {
    pub tarif: Money,
    pub source: TariffSource,
    pub unite: String,
}

/// Aggregate root: ClinicTariff (one stream per clinic + service).
///
/// Every `TariffSet` event carries the previous and new tariff, so the
/// stream itself is the pricing history the original kept in a separate
/// table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicTariff {
    service_id: ServiceId,
    clinic_id: Option<ClinicId>,
    tarif: Money,
    unite: String,
    active: bool,
    version: u64,
    created: bool,
}

impl ClinicTariff {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(service_id: ServiceId) -> Self {
        Self {
            service_id,
            clinic_id: None,
            tarif: Money::zero(),
            unite: String::new(),
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn tarif(&self) -> Money {
        self.tarif
    }

    pub fn unite(&self) -> &str {
        &self.unite
    }

    pub fn is_active(&self) -> bool {
        self.created && self.active
    }
}

impl AggregateRoot for ClinicTariff {
    type Id = ServiceId;

    fn id(&self) -> &Self::Id {
        &self.service_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SetTariff (create or update the clinic override).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTariff {
    pub clinic_id: ClinicId,
    pub service_id: ServiceId,
    pub tarif: Money,
    pub unite: String,
    pub modified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateTariff (fall back to the default tariff).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateTariff {
    pub clinic_id: ClinicId,
    pub service_id: ServiceId,
    pub modified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TariffCommand {
    SetTariff(SetTariff),
    DeactivateTariff(DeactivateTariff),
}

impl Command for TariffCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            TariffCommand::SetTariff(c) => c.service_id.0,
            TariffCommand::DeactivateTariff(c) => c.service_id.0,
        }
    }
}

/// Event: TariffSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffSet {
    pub clinic_id: ClinicId,
    pub service_id: ServiceId,
    pub tarif_ancien: Money,
    pub tarif_nouveau: Money,
    pub unite: String,
    pub modified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TariffDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffDeactivated {
    pub clinic_id: ClinicId,
    pub service_id: ServiceId,
    pub modified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TariffEvent {
    TariffSet(TariffSet),
    TariffDeactivated(TariffDeactivated),
}

impl Event for TariffEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TariffEvent::TariffSet(_) => "pricing.tariff.set",
            TariffEvent::TariffDeactivated(_) => "pricing.tariff.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TariffEvent::TariffSet(e) => e.occurred_at,
            TariffEvent::TariffDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ClinicTariff {
    type Command = TariffCommand;
    type Event = TariffEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TariffEvent::TariffSet(e) => {
                self.service_id = e.service_id;
                self.clinic_id = Some(e.clinic_id);
                self.tarif = e.tarif_nouveau;
                self.unite = e.unite.clone();
                self.active = true;
                self.created = true;
            }
            TariffEvent::TariffDeactivated(_) => {
                self.active = false;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TariffCommand::SetTariff(cmd) => self.handle_set(cmd),
            TariffCommand::DeactivateTariff(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl ClinicTariff {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn handle_set(&self, cmd: &SetTariff) -> Result<Vec<TariffEvent>, DomainError> {
        self.ensure_clinic(cmd.clinic_id)?;

        if cmd.service_id != self.service_id {
            return Err(DomainError::invariant("service_id mismatch"));
        }
        if cmd.tarif.is_negative() {
            return Err(DomainError::validation("tariff cannot be negative"));
        }
        if cmd.unite.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }

        // Re-setting the same active tariff is a no-op, not a history entry.
        if self.is_active() && self.tarif == cmd.tarif && self.unite == cmd.unite {
            return Ok(vec![]);
        }

        Ok(vec![TariffEvent::TariffSet(TariffSet {
            clinic_id: cmd.clinic_id,
            service_id: cmd.service_id,
            tarif_ancien: if self.created { self.tarif } else { Money::zero() },
            tarif_nouveau: cmd.tarif,
            unite: cmd.unite.clone(),
            modified_by: cmd.modified_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateTariff) -> Result<Vec<TariffEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;

        if !self.active {
            return Err(DomainError::conflict("tariff is already inactive"));
        }

        Ok(vec![TariffEvent::TariffDeactivated(TariffDeactivated {
            clinic_id: cmd.clinic_id,
            service_id: cmd.service_id,
            modified_by: cmd.modified_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
