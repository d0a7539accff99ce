/// Dispensing policy knobs, injected into the processor at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispensingPolicy {
    /// A prescription older than this (in ceiling days) can no longer be
    /// dispensed.
    pub max_prescription_age_days: i64,

    /// Lots expiring within this window trigger a non-blocking warning.
    pub near_expiry_warning_days: i64,
}

impl Default for DispensingPolicy {
    fn default() -> Self {
        Self {
            max_prescription_age_days: 7,
            near_expiry_warning_days: 30,
        }
    }
}
