//! `logiclinic-stock` — lot-tracked medication stock (the stock ledger).

pub mod lot;

pub use lot::{
    Availability, DeactivateLot, DecrementStock, Lot, LotCommand, LotDeactivated, LotEvent,
    LotId, LotReceived, LotStatus, MedicationId, ReceiveLot, RestoreStock, StockDecremented,
    StockRestored,
};
