use serde::{Deserialize, Serialize};

/// Clinic staff roles used for RBAC.
///
/// A closed set: the role vocabulary is part of the product, not free-form
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Medecin,
    Pharmacien,
    Caissier,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Medecin => "medecin",
            Role::Pharmacien => "pharmacien",
            Role::Caissier => "caissier",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
