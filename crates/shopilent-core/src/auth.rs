//! Caller identity and role policies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Order;
use crate::error::{Result, ShopilentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Customer,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "Customer",
            Role::Manager => "Manager",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ShopilentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(ShopilentError::validation(format!("unknown role '{other}'"))),
        }
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Admin or Manager.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager)
    }

    pub fn require_staff(&self) -> Result<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(ShopilentError::Forbidden(
                "requires the Admin or Manager role".into(),
            ))
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ShopilentError::Forbidden("requires the Admin role".into()))
        }
    }

    pub fn can_access(&self, order: &Order) -> bool {
        self.is_staff() || order.user_id == self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_policies() {
        let customer = Principal::new(Uuid::new_v4(), Role::Customer);
        let manager = Principal::new(Uuid::new_v4(), Role::Manager);
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);

        assert!(customer.require_staff().is_err());
        assert!(manager.require_staff().is_ok());
        assert!(manager.require_admin().is_err());
        assert!(admin.require_admin().is_ok());
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }
}
