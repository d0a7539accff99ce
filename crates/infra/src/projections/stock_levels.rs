use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use logiclinic_core::calendar::days_ceil;
use logiclinic_core::Money;
use logiclinic_events::EventEnvelope;
use logiclinic_stock::{LotEvent, LotId, LotStatus, MedicationId};

use crate::read_model::ClinicStore;

use super::{ProjectionApplyError, StreamCursors};

/// Queryable stock read model: one row per lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotReadModel {
    pub lot_id: LotId,
    pub medication_id: MedicationId,
    pub medication_label: String,
    pub lot_number: String,
    pub remaining: i64,
    pub unit_cost: Money,
    pub expires_at: DateTime<Utc>,
    pub status: LotStatus,
}

/// Lots needing attention: already expired or expiring soon.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StockAlerts {
    pub expired: Vec<LotReadModel>,
    /// Near-expiry lots with the remaining days, soonest first.
    pub near_expiry: Vec<(LotReadModel, i64)>,
}

/// Stock levels projection.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: ClinicStore<LotId, LotReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockLevelsProjection<S>
where
    S: ClinicStore<LotId, LotReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, clinic_id: logiclinic_core::ClinicId, lot_id: &LotId) -> Option<LotReadModel> {
        self.store.get(clinic_id, lot_id)
    }

    pub fn list(&self, clinic_id: logiclinic_core::ClinicId) -> Vec<LotReadModel> {
        self.store.list(clinic_id)
    }

    /// Expired and near-expiry lots with stock left, as of `now`.
    pub fn alerts(
        &self,
        clinic_id: logiclinic_core::ClinicId,
        now: DateTime<Utc>,
        warning_days: i64,
    ) -> StockAlerts {
        let mut alerts = StockAlerts::default();

        for lot in self.store.list(clinic_id) {
            if lot.remaining <= 0 {
                continue;
            }
            if now > lot.expires_at {
                alerts.expired.push(lot);
                continue;
            }
            let days = days_ceil(now, lot.expires_at);
            if days < warning_days {
                alerts.near_expiry.push((lot, days));
            }
        }

        alerts.near_expiry.sort_by_key(|(_, days)| *days);
        alerts
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

        let event: LotEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;

        let (event_clinic, lot_id) = match &event {
            LotEvent::LotReceived(e) => (e.clinic_id, e.lot_id),
            LotEvent::StockDecremented(e) => (e.clinic_id, e.lot_id),
            LotEvent::StockRestored(e) => (e.clinic_id, e.lot_id),
            LotEvent::LotDeactivated(e) => (e.clinic_id, e.lot_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if lot_id.0 != aggregate_id {
            return Err(ProjectionApplyError::ClinicIsolation(
                "event lot_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            LotEvent::LotReceived(e) => {
                self.store.upsert(
                    clinic_id,
                    e.lot_id,
                    LotReadModel {
                        lot_id: e.lot_id,
                        medication_id: e.medication_id,
                        medication_label: e.medication_label,
                        lot_number: e.lot_number,
                        remaining: e.quantity,
                        unit_cost: e.unit_cost,
                        expires_at: e.expires_at,
                        status: e.status,
                    },
                );
            }
            LotEvent::StockDecremented(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.lot_id) {
                    rm.remaining = e.quantity_after;
                    self.store.upsert(clinic_id, e.lot_id, rm);
                }
            }
            LotEvent::StockRestored(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.lot_id) {
                    rm.remaining = e.quantity_after;
                    self.store.upsert(clinic_id, e.lot_id, rm);
                }
            }
            LotEvent::LotDeactivated(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &e.lot_id) {
                    rm.status = LotStatus::Inactif;
                    self.store.upsert(clinic_id, e.lot_id, rm);
                }
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionApplyError> {
        self.cursors.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut clinics = envs.iter().map(|e| e.clinic_id()).collect::<Vec<_>>();
            clinics.sort_by_key(|c| *c.as_uuid().as_bytes());
            clinics.dedup();
            for c in clinics {
                self.store.clear_clinic(c);
            }
        }

        // Deterministic replay order: clinic, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.clinic_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
