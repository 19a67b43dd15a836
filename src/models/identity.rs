use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Rider,
    Conductor,
    Owner,
}

impl std::str::FromStr for Role {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rider" => Ok(Role::Rider),
            "conductor" => Ok(Role::Conductor),
            "owner" => Ok(Role::Owner),
            other => Err(AppError::Unauthorized(format!(
                "unknown role: {other}, expected Rider/Conductor/Owner"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{:?} {} cannot act as {:?}",
                self.role, self.user_id, role
            )))
        }
    }
}
