use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role granted to a principal by the identity provider.
///
/// The legacy role names stored by the original application
/// (`logistica`, `armazem`, `cliente`, `comercial`) are accepted as aliases.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[serde(alias = "logistica")]
    Logistics,
    #[serde(alias = "armazem")]
    Warehouse,
    #[serde(alias = "cliente")]
    Client,
    #[serde(alias = "comercial")]
    Commercial,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Logistics => "logistics",
            Role::Warehouse => "warehouse",
            Role::Client => "client",
            Role::Commercial => "commercial",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "logistics" | "logistica" => Ok(Role::Logistics),
            "warehouse" | "armazem" => Ok(Role::Warehouse),
            "client" | "cliente" => Ok(Role::Client),
            "commercial" | "comercial" => Ok(Role::Commercial),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Static role → permission policy.
pub fn role_permissions(role: Role) -> Vec<Permission> {
    match role {
        Role::Admin => vec![Permission::wildcard()],
        Role::Logistics => vec![
            Permission::RELEASES_CREATE,
            Permission::RELEASES_CANCEL,
            Permission::SCHEDULES_CREATE,
            Permission::SCHEDULES_MANAGE_ANY,
            Permission::LOADINGS_OPERATE,
            Permission::STOCK_ADJUST,
        ],
        Role::Commercial => vec![Permission::RELEASES_CREATE],
        Role::Warehouse => vec![Permission::LOADINGS_OPERATE, Permission::STOCK_ADJUST],
        Role::Client => vec![Permission::SCHEDULES_CREATE],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_names_parse_and_deserialize() {
        assert_eq!("armazem".parse::<Role>().unwrap(), Role::Warehouse);
        let role: Role = serde_json::from_str("\"logistica\"").unwrap();
        assert_eq!(role, Role::Logistics);
        assert_eq!(serde_json::to_string(&role).unwrap(), "\"logistics\"");
    }

    #[test]
    fn client_cannot_operate_loadings() {
        assert!(!role_permissions(Role::Client).contains(&Permission::LOADINGS_OPERATE));
        assert!(role_permissions(Role::Warehouse).contains(&Permission::LOADINGS_OPERATE));
    }
}
