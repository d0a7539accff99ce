//! `logiclinic-pricing` — billable service tariffs (clinic override vs default).

pub mod catalog;
pub mod tariff;

pub use catalog::{BillableService, DefaultTariffCatalog, ServiceId};
pub use tariff::{
    ClinicTariff, DeactivateTariff, ResolvedTariff, SetTariff, TariffCommand, TariffDeactivated,
    TariffEvent, TariffSet, TariffSource,
};
