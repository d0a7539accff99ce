//! Tiers-payant coverage terms and the patient/insurer payment split.

use serde::{Deserialize, Serialize};

use logiclinic_core::{AggregateId, DomainError, Money, ValueObject};

/// Insurer identity attached to a covered dispensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsurerRef {
    pub insurer_id: AggregateId,
    pub name: String,
}

impl ValueObject for InsurerRef {}

/// Coverage terms supplied by the patient's insurance context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    /// Covered percentage, 0..=100.
    pub taux_couverture: u8,
    /// Optional cap on the insurer share.
    pub plafond: Option<Money>,
    pub insurer: InsurerRef,
}

impl Coverage {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.taux_couverture > 100 {
            return Err(DomainError::validation(
                "coverage rate must be between 0 and 100",
            ));
        }
        if let Some(plafond) = self.plafond {
            if plafond.is_negative() {
                return Err(DomainError::validation("coverage cap cannot be negative"));
            }
        }
        if self.insurer.name.trim().is_empty() {
            return Err(DomainError::validation("insurer name cannot be empty"));
        }
        Ok(())
    }
}

impl ValueObject for Coverage {}

/// How a total splits between insurer and patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub montant_total: Money,
    pub montant_assurance: Money,
    pub montant_patient: Money,
}

impl PaymentSplit {
    /// Split `total` according to the coverage terms, if any.
    ///
    /// The insurer share is the covered percentage rounded half-up to the
    /// whole franc, then capped; the patient share is the exact remainder,
    /// so `montant_assurance + montant_patient == montant_total` always
    /// holds (the patient absorbs the rounding).
    pub fn compute(total: Money, coverage: Option<&Coverage>) -> PaymentSplit {
        let montant_assurance = match coverage {
            Some(c) => {
                let covered = total.percentage_rounded(c.taux_couverture);
                match c.plafond {
                    Some(plafond) => covered.min(plafond),
                    None => covered,
                }
            }
            None => Money::zero(),
        };

        PaymentSplit {
            montant_total: total,
            montant_assurance,
            montant_patient: total - montant_assurance,
        }
    }
}

impl ValueObject for PaymentSplit {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coverage(taux: u8, plafond: Option<i64>) -> Coverage {
        Coverage {
            taux_couverture: taux,
            plafond: plafond.map(Money::from_francs),
            insurer: InsurerRef {
                insurer_id: AggregateId::new(),
                name: "MUGEF-CI".to_string(),
            },
        }
    }

    #[test]
    fn seventy_percent_of_ten_thousand() {
        let split = PaymentSplit::compute(Money::from_francs(10_000), Some(&coverage(70, None)));

        assert_eq!(split.montant_assurance.francs(), 7_000);
        assert_eq!(split.montant_patient.francs(), 3_000);
    }

    #[test]
    fn cap_limits_the_insurer_share() {
        let split = PaymentSplit::compute(
            Money::from_francs(50_000),
            Some(&coverage(80, Some(20_000))),
        );

        assert_eq!(split.montant_assurance.francs(), 20_000);
        assert_eq!(split.montant_patient.francs(), 30_000);
    }

    #[test]
    fn no_coverage_means_patient_pays_everything() {
        let split = PaymentSplit::compute(Money::from_francs(11_300), None);

        assert_eq!(split.montant_assurance.francs(), 0);
        assert_eq!(split.montant_patient.francs(), 11_300);
    }

    #[test]
    fn rounding_remainder_lands_on_the_patient() {
        // 33% of 101 rounds to 33; patient picks up the 68.
        let split = PaymentSplit::compute(Money::from_francs(101), Some(&coverage(33, None)));

        assert_eq!(split.montant_assurance.francs(), 33);
        assert_eq!(split.montant_patient.francs(), 68);
    }

    #[test]
    fn rate_above_hundred_is_invalid() {
        let c = coverage(101, None);
        assert!(c.validate().is_err());
    }

    proptest! {
        /// No rounding leak: the split always reassembles to the exact total.
        #[test]
        fn split_is_exact(
            total in 0i64..100_000_000,
            taux in 0u8..=100,
            plafond in prop::option::of(0i64..100_000_000),
        ) {
            let split = PaymentSplit::compute(
                Money::from_francs(total),
                Some(&coverage(taux, plafond)),
            );

            prop_assert_eq!(
                split.montant_assurance + split.montant_patient,
                split.montant_total
            );
            prop_assert!(!split.montant_assurance.is_negative());
            prop_assert!(!split.montant_patient.is_negative());
        }
    }
}
