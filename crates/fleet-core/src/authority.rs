//! Caller identity for privileged operations.

use serde::{Deserialize, Serialize};

use crate::error::AuthorityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A drone acting on its own behalf
    Agent,
    /// Human fleet operator
    Operator,
    /// The coordination service itself
    Coordinator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub caller_id: String,
    pub role: Role,
}

impl Authority {
    pub fn new(caller_id: impl Into<String>, role: Role) -> Self {
        Self {
            caller_id: caller_id.into(),
            role,
        }
    }

    pub fn coordinator() -> Self {
        Self::new("fleet-coordinator", Role::Coordinator)
    }

    /// Allow operators and the coordinator; reject agents.
    pub fn require_fleet_control(&self, operation: &'static str) -> Result<(), AuthorityError> {
        match self.role {
            Role::Operator | Role::Coordinator => Ok(()),
            Role::Agent => Err(AuthorityError {
                caller_id: self.caller_id.clone(),
                role: self.role,
                operation,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agents_cannot_control_the_fleet() {
        let agent = Authority::new("DRONE-7", Role::Agent);
        let err = agent.require_fleet_control("recover flight mode").unwrap_err();
        assert_eq!(err.operation, "recover flight mode");

        assert!(Authority::new("ops-1", Role::Operator)
            .require_fleet_control("recover flight mode")
            .is_ok());
        assert!(Authority::coordinator().require_fleet_control("add drone").is_ok());
    }
}
