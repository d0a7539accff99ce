use thiserror::Error;

use logiclinic_core::{ClinicId, UserId};

use crate::{Permission, Role};

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub clinic_id: ClinicId,
    pub roles: Vec<Role>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Permissions granted by a role.
///
/// The policy is static product knowledge, kept here so the API layer and
/// any future worker enforce the same mapping.
pub fn role_permissions(role: Role) -> Vec<Permission> {
    match role {
        Role::Admin => vec![Permission::new("*")],
        Role::Medecin => vec![
            Permission::new("prescriptions.create"),
            Permission::new("prescriptions.cancel"),
            Permission::new("prescriptions.read"),
        ],
        Role::Pharmacien => vec![
            Permission::new("pharmacy.stock.receive"),
            Permission::new("pharmacy.stock.read"),
            Permission::new("pharmacy.dispense"),
            Permission::new("prescriptions.read"),
            Permission::new("pricing.tariffs.read"),
        ],
        Role::Caissier => vec![
            Permission::new("billing.tickets.read"),
            Permission::new("billing.tickets.settle"),
        ],
    }
}

/// Authorize a principal for one required permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let allowed = principal.roles.iter().any(|role| {
        role_permissions(*role)
            .iter()
            .any(|p| p.is_wildcard() || p.as_str() == required.as_str())
    });

    if allowed {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: Vec<Role>) -> Principal {
        Principal {
            user_id: UserId::new(),
            clinic_id: ClinicId::new(),
            roles,
        }
    }

    #[test]
    fn pharmacien_can_dispense_but_not_settle() {
        let p = principal(vec![Role::Pharmacien]);

        assert!(authorize(&p, &Permission::new("pharmacy.dispense")).is_ok());
        assert!(authorize(&p, &Permission::new("billing.tickets.settle")).is_err());
    }

    #[test]
    fn admin_wildcard_allows_everything() {
        let p = principal(vec![Role::Admin]);

        assert!(authorize(&p, &Permission::new("pharmacy.dispense")).is_ok());
        assert!(authorize(&p, &Permission::new("pricing.tariffs.set")).is_ok());
    }

    #[test]
    fn multiple_roles_union_their_permissions() {
        let p = principal(vec![Role::Pharmacien, Role::Caissier]);

        assert!(authorize(&p, &Permission::new("pharmacy.dispense")).is_ok());
        assert!(authorize(&p, &Permission::new("billing.tickets.settle")).is_ok());
    }
}
