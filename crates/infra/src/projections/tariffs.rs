use std::sync::Arc;

use serde_json::Value as JsonValue;

use logiclinic_core::{ClinicId, Money};
use logiclinic_events::EventEnvelope;
use logiclinic_pricing::{
    DefaultTariffCatalog, ResolvedTariff, ServiceId, TariffEvent, TariffSource,
};

use crate::read_model::ClinicStore;

use super::{ProjectionApplyError, StreamCursors};

/// Clinic tariff override read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TariffReadModel {
    pub service_id: ServiceId,
    pub tarif: Money,
    pub unite: String,
    pub active: bool,
}

/// One line of the clinic-vs-default pricing summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TariffSummaryEntry {
    pub service_id: ServiceId,
    pub code: String,
    pub nom: String,
    pub tarif_defaut: Money,
    pub tarif_clinique: Option<Money>,
    pub tarif_applique: Money,
    pub source: TariffSource,
    pub unite: String,
}

/// Clinic tariffs projection.
#[derive(Debug)]
pub struct ClinicTariffsProjection<S>
where
    S: ClinicStore<ServiceId, TariffReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ClinicTariffsProjection<S>
where
    S: ClinicStore<ServiceId, TariffReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, clinic_id: ClinicId, service_id: &ServiceId) -> Option<TariffReadModel> {
        self.store.get(clinic_id, service_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<TariffReadModel> {
        self.store.list(clinic_id)
    }

    /// Apply a published envelope into the projection (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.check(clinic_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: TariffEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;

        let (event_clinic, service_id) = match &event {
            TariffEvent::TariffSet(e) => (e.clinic_id, e.service_id),
            TariffEvent::TariffDeactivated(e) => (e.clinic_id, e.service_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if service_id.0 != aggregate_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event service_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            TariffEvent::TariffSet(e) => {
                self.store.upsert(
                    clinic_id,
                    e.service_id,
                    TariffReadModel {
                        service_id: e.service_id,
                        tarif: e.tarif_nouveau,
                        unite: e.unite,
                        active: true,
                    },
                );
            }
            TariffEvent::TariffDeactivated(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.service_id) {
                    rm.active = false;
                    self.store.upsert(clinic_id, e.service_id, rm);
                }
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }
}

/// Resolves the applicable tariff: active clinic override first, default
/// catalog otherwise.
pub struct TariffResolver<S>
where
    S: ClinicStore<ServiceId, TariffReadModel>,
{
    projection: Arc<ClinicTariffsProjection<S>>,
    catalog: Arc<DefaultTariffCatalog>,
}

impl<S> TariffResolver<S>
where
    S: ClinicStore<ServiceId, TariffReadModel>,
{
    pub fn new(
        projection: Arc<ClinicTariffsProjection<S>>,
        catalog: Arc<DefaultTariffCatalog>,
    ) -> Self {
        Self {
            projection,
            catalog,
        }
    }

    pub fn resolve(&self, clinic_id: ClinicId, service_id: ServiceId) -> Option<ResolvedTariff> {
        if let Some(rm) = self.projection.get(clinic_id, &service_id) {
            if rm.active {
                return Some(ResolvedTariff {
                    tarif: rm.tarif,
                    source: TariffSource::Clinic,
                    unite: rm.unite,
                });
            }
        }

        self.catalog.get(service_id).map(|s| ResolvedTariff {
            tarif: s.tarif_defaut,
            source: TariffSource::Default,
            unite: s.unite.clone(),
        })
    }

    /// Clinic-vs-default summary for every catalog service.
    pub fn summary(&self, clinic_id: ClinicId) -> Vec<TariffSummaryEntry> {
        self.catalog
            .list()
            .iter()
            .map(|service| {
                let override_ = self
                    .projection
                    .get(clinic_id, &service.service_id)
                    .filter(|rm| rm.active);

                match override_ {
                    Some(rm) => TariffSummaryEntry {
                        service_id: service.service_id,
                        code: service.code.clone(),
                        nom: service.nom.clone(),
                        tarif_defaut: service.tarif_defaut,
                        tarif_clinique: Some(rm.tarif),
                        tarif_applique: rm.tarif,
                        source: TariffSource::Clinic,
                        unite: rm.unite,
                    },
                    None => TariffSummaryEntry {
                        service_id: service.service_id,
                        code: service.code.clone(),
                        nom: service.nom.clone(),
                        tarif_defaut: service.tarif_defaut,
                        tarif_clinique: None,
                        tarif_applique: service.tarif_defaut,
                        source: TariffSource::Default,
                        unite: service.unite.clone(),
                    },
                }
            })
            .collect()
    }
}
