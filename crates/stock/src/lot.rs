use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use logiclinic_core::calendar::days_ceil;
use logiclinic_core::{
    Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, Money, UserId,
};
use logiclinic_events::{Command, Event};

/// Medication reference carried by lots, prescription lines and dispensation
/// lines. The medication catalog itself lives outside this workflow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MedicationId(pub AggregateId);

impl MedicationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for MedicationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lot identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(pub AggregateId);

impl LotId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lot lifecycle status.
///
/// A lot that reaches zero remaining stays `Actif` with nothing left to
/// allocate; depletion is a quantity fact, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotStatus {
    Actif,
    Inactif,
    Expire,
}

/// Availability answer for a requested quantity, as of a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub sufficient: bool,
    pub expired: bool,
    /// Days until expiration (rounded up); `None` once expired.
    pub days_to_expiry: Option<i64>,
}

/// Aggregate root: Lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lot {
    id: LotId,
    clinic_id: Option<ClinicId>,
    medication_id: Option<MedicationId>,
    medication_label: String,
    lot_number: String,
    quantity_received: i64,
    remaining: i64,
    unit_cost: Money,
    entered_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    status: LotStatus,
    version: u64,
    created: bool,
}

impl Lot {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LotId) -> Self {
        Self {
            id,
            clinic_id: None,
            medication_id: None,
            medication_label: String::new(),
            lot_number: String::new(),
            quantity_received: 0,
            remaining: 0,
            unit_cost: Money::zero(),
            entered_at: None,
            expires_at: None,
            status: LotStatus::Actif,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LotId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn medication_id(&self) -> Option<MedicationId> {
        self.medication_id
    }

    pub fn medication_label(&self) -> &str {
        &self.medication_label
    }

    pub fn lot_number(&self) -> &str {
        &self.lot_number
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn unit_cost(&self) -> Money {
        self.unit_cost
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn status(&self) -> LotStatus {
        self.status
    }

    pub fn is_expired(&self, as_of: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => as_of > expiry,
            None => false,
        }
    }

    /// Can `requested` units be taken from this lot right now?
    ///
    /// `days_to_expiry` is what callers use to raise the non-blocking
    /// near-expiry warning; it never blocks an allocation by itself.
    pub fn availability(&self, requested: i64, as_of: DateTime<Utc>) -> Availability {
        let expired = self.is_expired(as_of);
        let days_to_expiry = if expired {
            None
        } else {
            self.expires_at.map(|expiry| days_ceil(as_of, expiry))
        };

        Availability {
            sufficient: !expired
                && self.status == LotStatus::Actif
                && self.remaining >= requested,
            expired,
            days_to_expiry,
        }
    }
}

impl AggregateRoot for Lot {
    type Id = LotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveLot (stock receipt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLot {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub medication_id: MedicationId,
    pub medication_label: String,
    pub lot_number: String,
    pub quantity: i64,
    pub unit_cost: Money,
    pub expires_at: DateTime<Utc>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecrementStock (dispensation takes units out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecrementStock {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub quantity: i64,
    /// Movement journal entry, e.g. "Dispensation DISP-...".
    pub reason: String,
    /// Origin reference (dispensation id).
    pub reference: String,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestoreStock (compensation when a multi-lot finalize fails midway).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreStock {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub quantity: i64,
    pub reason: String,
    pub reference: String,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateLot (manual quarantine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateLot {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotCommand {
    ReceiveLot(ReceiveLot),
    DecrementStock(DecrementStock),
    RestoreStock(RestoreStock),
    DeactivateLot(DeactivateLot),
}

impl Command for LotCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            LotCommand::ReceiveLot(c) => c.lot_id.0,
            LotCommand::DecrementStock(c) => c.lot_id.0,
            LotCommand::RestoreStock(c) => c.lot_id.0,
            LotCommand::DeactivateLot(c) => c.lot_id.0,
        }
    }
}

/// Event: LotReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotReceived {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub medication_id: MedicationId,
    pub medication_label: String,
    pub lot_number: String,
    pub quantity: i64,
    pub unit_cost: Money,
    pub expires_at: DateTime<Utc>,
    /// `Inactif` when the lot arrived already expired (quarantine).
    pub status: LotStatus,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockDecremented (movement journal entry with snapshots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDecremented {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reason: String,
    pub reference: String,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockRestored (compensating movement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRestored {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reason: String,
    pub reference: String,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LotDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDeactivated {
    pub clinic_id: ClinicId,
    pub lot_id: LotId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotEvent {
    LotReceived(LotReceived),
    StockDecremented(StockDecremented),
    StockRestored(StockRestored),
    LotDeactivated(LotDeactivated),
}

impl Event for LotEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LotEvent::LotReceived(_) => "stock.lot.received",
            LotEvent::StockDecremented(_) => "stock.lot.decremented",
            LotEvent::StockRestored(_) => "stock.lot.restored",
            LotEvent::LotDeactivated(_) => "stock.lot.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LotEvent::LotReceived(e) => e.occurred_at,
            LotEvent::StockDecremented(e) => e.occurred_at,
            LotEvent::StockRestored(e) => e.occurred_at,
            LotEvent::LotDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Lot {
    type Command = LotCommand;
    type Event = LotEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LotEvent::LotReceived(e) => {
                self.id = e.lot_id;
                self.clinic_id = Some(e.clinic_id);
                self.medication_id = Some(e.medication_id);
                self.medication_label = e.medication_label.clone();
                self.lot_number = e.lot_number.clone();
                self.quantity_received = e.quantity;
                self.remaining = e.quantity;
                self.unit_cost = e.unit_cost;
                self.entered_at = Some(e.occurred_at);
                self.expires_at = Some(e.expires_at);
                self.status = e.status;
                self.created = true;
            }
            LotEvent::StockDecremented(e) => {
                self.remaining = e.quantity_after;
            }
            LotEvent::StockRestored(e) => {
                self.remaining = e.quantity_after;
            }
            LotEvent::LotDeactivated(_) => {
                self.status = LotStatus::Inactif;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LotCommand::ReceiveLot(cmd) => self.handle_receive(cmd),
            LotCommand::DecrementStock(cmd) => self.handle_decrement(cmd),
            LotCommand::RestoreStock(cmd) => self.handle_restore(cmd),
            LotCommand::DeactivateLot(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Lot {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_lot_id(&self, lot_id: LotId) -> Result<(), DomainError> {
        if self.id != lot_id {
            return Err(DomainError::invariant("lot_id mismatch"));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveLot) -> Result<Vec<LotEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("lot already exists"));
        }
        if cmd.medication_label.trim().is_empty() {
            return Err(DomainError::validation("medication label cannot be empty"));
        }
        if cmd.lot_number.trim().is_empty() {
            return Err(DomainError::validation("lot number cannot be empty"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        if cmd.unit_cost.is_negative() {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }

        // A lot that arrives past its expiration date goes straight to
        // quarantine; it exists for traceability but can never be allocated.
        let status = if cmd.expires_at <= cmd.occurred_at {
            LotStatus::Inactif
        } else {
            LotStatus::Actif
        };

        Ok(vec![LotEvent::LotReceived(LotReceived {
            clinic_id: cmd.clinic_id,
            lot_id: cmd.lot_id,
            medication_id: cmd.medication_id,
            medication_label: cmd.medication_label.clone(),
            lot_number: cmd.lot_number.clone(),
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            expires_at: cmd.expires_at,
            status,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decrement(&self, cmd: &DecrementStock) -> Result<Vec<LotEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_lot_id(cmd.lot_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("decrement quantity must be positive"));
        }

        // Re-validated here, at decrement time: the availability answer a
        // caller got earlier is advisory only. Combined with the expected-
        // version guard on append, this closes the check-then-decrement race.
        if self.is_expired(cmd.occurred_at) || self.status == LotStatus::Expire {
            return Err(DomainError::LotExpired);
        }
        if self.status != LotStatus::Actif {
            return Err(DomainError::invariant("lot is not active"));
        }
        if cmd.quantity > self.remaining {
            return Err(DomainError::insufficient_stock(cmd.quantity, self.remaining));
        }

        Ok(vec![LotEvent::StockDecremented(StockDecremented {
            clinic_id: cmd.clinic_id,
            lot_id: cmd.lot_id,
            quantity: cmd.quantity,
            quantity_before: self.remaining,
            quantity_after: self.remaining - cmd.quantity,
            reason: cmd.reason.clone(),
            reference: cmd.reference.clone(),
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restore(&self, cmd: &RestoreStock) -> Result<Vec<LotEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_lot_id(cmd.lot_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("restore quantity must be positive"));
        }
        if self.remaining + cmd.quantity > self.quantity_received {
            return Err(DomainError::invariant(
                "cannot restore beyond the received quantity",
            ));
        }

        Ok(vec![LotEvent::StockRestored(StockRestored {
            clinic_id: cmd.clinic_id,
            lot_id: cmd.lot_id,
            quantity: cmd.quantity,
            quantity_before: self.remaining,
            quantity_after: self.remaining + cmd.quantity,
            reason: cmd.reason.clone(),
            reference: cmd.reference.clone(),
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateLot) -> Result<Vec<LotEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_lot_id(cmd.lot_id)?;

        if self.status == LotStatus::Inactif {
            return Err(DomainError::conflict("lot is already inactive"));
        }

        Ok(vec![LotEvent::LotDeactivated(LotDeactivated {
            clinic_id: cmd.clinic_id,
            lot_id: cmd.lot_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use logiclinic_core::AggregateId;
    use logiclinic_events::execute;
    use proptest::prelude::*;

    fn test_clinic_id() -> ClinicId {
        ClinicId::new()
    }

    fn test_lot_id() -> LotId {
        LotId::new(AggregateId::new())
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn received_lot(quantity: i64, expires_in_days: i64) -> (Lot, ClinicId, LotId) {
        let clinic_id = test_clinic_id();
        let lot_id = test_lot_id();
        let mut lot = Lot::empty(lot_id);
        let now = Utc::now();

        let cmd = ReceiveLot {
            clinic_id,
            lot_id,
            medication_id: MedicationId::new(AggregateId::new()),
            medication_label: "Paracétamol 500mg".to_string(),
            lot_number: "LOT2026001".to_string(),
            quantity,
            unit_cost: Money::from_francs(150),
            expires_at: now + Duration::days(expires_in_days),
            recorded_by: test_user_id(),
            occurred_at: now,
        };
        execute(&mut lot, &LotCommand::ReceiveLot(cmd)).unwrap();

        (lot, clinic_id, lot_id)
    }

    fn decrement_cmd(clinic_id: ClinicId, lot_id: LotId, quantity: i64) -> LotCommand {
        LotCommand::DecrementStock(DecrementStock {
            clinic_id,
            lot_id,
            quantity,
            reason: "Dispensation".to_string(),
            reference: "disp-1".to_string(),
            recorded_by: test_user_id(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn receive_lot_sets_full_remaining() {
        let (lot, _, _) = received_lot(100, 365);
        assert_eq!(lot.remaining(), 100);
        assert_eq!(lot.status(), LotStatus::Actif);
    }

    #[test]
    fn expired_on_arrival_goes_to_quarantine() {
        let clinic_id = test_clinic_id();
        let lot_id = test_lot_id();
        let mut lot = Lot::empty(lot_id);
        let now = Utc::now();

        let cmd = ReceiveLot {
            clinic_id,
            lot_id,
            medication_id: MedicationId::new(AggregateId::new()),
            medication_label: "Amoxicilline 500mg".to_string(),
            lot_number: "LOT2023001".to_string(),
            quantity: 50,
            unit_cost: Money::from_francs(200),
            expires_at: now - Duration::days(30),
            recorded_by: test_user_id(),
            occurred_at: now,
        };
        execute(&mut lot, &LotCommand::ReceiveLot(cmd)).unwrap();

        assert_eq!(lot.status(), LotStatus::Inactif);
        let err = execute(&mut lot, &decrement_cmd(clinic_id, lot_id, 1)).unwrap_err();
        assert_eq!(err, DomainError::LotExpired);
    }

    #[test]
    fn decrement_records_before_after_snapshots() {
        let (mut lot, clinic_id, lot_id) = received_lot(100, 365);

        let events = execute(&mut lot, &decrement_cmd(clinic_id, lot_id, 15)).unwrap();
        match &events[0] {
            LotEvent::StockDecremented(e) => {
                assert_eq!(e.quantity_before, 100);
                assert_eq!(e.quantity_after, 85);
                assert_eq!(e.quantity_before - e.quantity, e.quantity_after);
            }
            other => panic!("expected StockDecremented, got {other:?}"),
        }
        assert_eq!(lot.remaining(), 85);
    }

    #[test]
    fn decrement_beyond_remaining_is_rejected() {
        let (mut lot, clinic_id, lot_id) = received_lot(5, 365);

        let err = execute(&mut lot, &decrement_cmd(clinic_id, lot_id, 10)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                requested: 10,
                available: 5
            }
        );
        assert_eq!(lot.remaining(), 5);
    }

    #[test]
    fn expired_lot_cannot_be_decremented() {
        let (mut lot, clinic_id, lot_id) = received_lot(50, 365);

        let cmd = LotCommand::DecrementStock(DecrementStock {
            clinic_id,
            lot_id,
            quantity: 1,
            reason: "Dispensation".to_string(),
            reference: "disp-1".to_string(),
            recorded_by: test_user_id(),
            occurred_at: Utc::now() + Duration::days(400),
        });
        let err = execute(&mut lot, &cmd).unwrap_err();
        assert_eq!(err, DomainError::LotExpired);
    }

    #[test]
    fn availability_reports_days_to_expiry() {
        let (lot, _, _) = received_lot(30, 15);
        let avail = lot.availability(10, Utc::now());

        assert!(avail.sufficient);
        assert!(!avail.expired);
        let days = avail.days_to_expiry.unwrap();
        assert!(days > 0 && days <= 15, "days = {days}");
    }

    #[test]
    fn availability_on_expired_lot() {
        let (lot, _, _) = received_lot(30, 15);
        let avail = lot.availability(10, Utc::now() + Duration::days(20));

        assert!(!avail.sufficient);
        assert!(avail.expired);
        assert_eq!(avail.days_to_expiry, None);
    }

    #[test]
    fn restore_undoes_a_decrement() {
        let (mut lot, clinic_id, lot_id) = received_lot(100, 365);
        execute(&mut lot, &decrement_cmd(clinic_id, lot_id, 40)).unwrap();

        let cmd = LotCommand::RestoreStock(RestoreStock {
            clinic_id,
            lot_id,
            quantity: 40,
            reason: "Annulation finalisation disp-1".to_string(),
            reference: "disp-1".to_string(),
            recorded_by: test_user_id(),
            occurred_at: Utc::now(),
        });
        execute(&mut lot, &cmd).unwrap();
        assert_eq!(lot.remaining(), 100);
    }

    #[test]
    fn restore_cannot_exceed_received_quantity() {
        let (mut lot, clinic_id, lot_id) = received_lot(100, 365);

        let cmd = LotCommand::RestoreStock(RestoreStock {
            clinic_id,
            lot_id,
            quantity: 1,
            reason: "Annulation".to_string(),
            reference: "disp-1".to_string(),
            recorded_by: test_user_id(),
            occurred_at: Utc::now(),
        });
        let err = execute(&mut lot, &cmd).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("received quantity") => {}
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    proptest! {
        /// Whatever sequence of decrements is attempted, remaining never goes
        /// negative: excess requests are rejected, accepted ones subtract.
        #[test]
        fn remaining_never_negative(initial in 1i64..1_000, takes in prop::collection::vec(1i64..200, 1..20)) {
            let (mut lot, clinic_id, lot_id) = received_lot(initial, 365);

            for qty in takes {
                let before = lot.remaining();
                match execute(&mut lot, &decrement_cmd(clinic_id, lot_id, qty)) {
                    Ok(_) => prop_assert_eq!(lot.remaining(), before - qty),
                    Err(_) => prop_assert_eq!(lot.remaining(), before),
                }
                prop_assert!(lot.remaining() >= 0);
            }
        }
    }
}
