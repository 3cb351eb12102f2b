use thiserror::Error;

use bulkyard_core::DomainError;

use crate::{Permission, Principal, PrincipalId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: only the creator or an elevated role may {0}")]
    NotOwner(&'static str),
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::Forbidden(value.to_string())
    }
}

/// Pure policy check: no IO, no panics.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.holds(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Allow the owner of a record, or anyone holding `override_permission`.
pub fn authorize_owner_or(
    principal: &Principal,
    owner: PrincipalId,
    override_permission: &Permission,
    action: &'static str,
) -> Result<(), AuthzError> {
    if principal.principal_id == owner || principal.holds(override_permission) {
        Ok(())
    } else {
        Err(AuthzError::NotOwner(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn admin_wildcard_grants_everything() {
        let admin = Principal::with_role(Role::Admin);
        assert!(authorize(&admin, &Permission::RELEASES_CANCEL).is_ok());
        assert!(authorize(&admin, &Permission::new("anything.at_all")).is_ok());
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let client = Principal::with_role(Role::Client);
        let err = authorize(&client, &Permission::LOADINGS_OPERATE).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("loadings.operate".to_string()));
        assert!(matches!(DomainError::from(err), DomainError::Forbidden(_)));
    }

    #[test]
    fn owner_or_elevated() {
        let owner = Principal::with_role(Role::Client);
        let other_client = Principal::with_role(Role::Client);
        let logistics = Principal::with_role(Role::Logistics);
        let perm = Permission::SCHEDULES_MANAGE_ANY;

        assert!(authorize_owner_or(&owner, owner.id(), &perm, "edit").is_ok());
        assert!(authorize_owner_or(&logistics, owner.id(), &perm, "edit").is_ok());
        assert_eq!(
            authorize_owner_or(&other_client, owner.id(), &perm, "edit"),
            Err(AuthzError::NotOwner("edit"))
        );
    }
}
