//! Projections: disposable, rebuildable read models over published envelopes.
//!
//! Every projection follows the same discipline:
//! - clinic isolation is validated against the envelope AND the payload
//! - a per-stream cursor makes at-least-once delivery idempotent
//! - read models can be cleared and rebuilt from the event history

pub mod active_prescriptions;
pub mod billing_tickets;
pub mod dispensations;
pub mod stock_levels;
pub mod tariffs;

pub use active_prescriptions::{
    ActivePrescriptionsProjection, PrescriptionLineReadModel, PrescriptionReadModel,
};
pub use billing_tickets::{BillingTicketsProjection, TicketReadModel};
pub use dispensations::{DispensationReadModel, DispensationsProjection};
pub use stock_levels::{LotReadModel, StockAlerts, StockLevelsProjection};
pub use tariffs::{ClinicTariffsProjection, TariffReadModel, TariffResolver, TariffSummaryEntry};

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use logiclinic_core::{AggregateId, ClinicId};

#[derive(Debug, Error)]
pub enum ProjectionApplyError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Per-stream cursor table supporting idempotent, at-least-once apply.
///
/// Replays at or below the cursor are ignored; the first event of a stream
/// may carry any positive sequence, afterwards strict increments are
/// required.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<(ClinicId, AggregateId), u64>>,
}

impl StreamCursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(false)` when the event is a replay that should be ignored.
    pub(crate) fn check(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<bool, ProjectionApplyError> {
        let cursors = match self.inner.read() {
            Ok(c) => c,
            Err(_) => return Ok(false),
        };
        let last = *cursors.get(&(clinic_id, aggregate_id)).unwrap_or(&0);

        if seq == 0 {
            return Err(ProjectionApplyError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(false);
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionApplyError::NonMonotonicSequence { last, found: seq });
        }
        Ok(true)
    }

    pub(crate) fn advance(&self, clinic_id: ClinicId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert((clinic_id, aggregate_id), seq);
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}
