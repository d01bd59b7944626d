use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            _ => Err(AppError::Validation(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn require_role(ctx: &SessionContext, role: Role) -> Result<(), AppError> {
    if ctx.role == role {
        return Ok(());
    }

    tracing::warn!(
        username = %ctx.username,
        role = %ctx.role,
        required = %role,
        "Permission denied"
    );
    Err(AppError::Forbidden(format!("{} access required", role)))
}

pub fn require_self_or_admin(ctx: &SessionContext, target_username: &str) -> Result<(), AppError> {
    if ctx.role == Role::Admin || ctx.username == target_username {
        return Ok(());
    }

    tracing::warn!(
        username = %ctx.username,
        target = %target_username,
        "Permission denied (self or admin)"
    );
    Err(AppError::Forbidden("Access denied".to_string()))
}
