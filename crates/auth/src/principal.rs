use core::str::FromStr;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Permission, Role, role_permissions};

/// Identity of an authenticated user or service account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The acting principal, passed explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self {
            principal_id,
            roles,
        }
    }

    /// Convenience for a fresh principal holding a single role.
    pub fn with_role(role: Role) -> Self {
        Self::new(PrincipalId::new(), vec![role])
    }

    pub fn id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Union of the permissions granted by every held role.
    pub fn permissions(&self) -> HashSet<Permission> {
        self.roles.iter().copied().flat_map(role_permissions).collect()
    }

    pub fn holds(&self, permission: &Permission) -> bool {
        let granted = self.permissions();
        granted.contains(&Permission::wildcard()) || granted.contains(permission)
    }
}
