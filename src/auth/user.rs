use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::Role;

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub is_deleted: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
    pub is_deleted: bool,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(user: DbUser) -> Result<Self, Self::Error> {
        Ok(Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name.unwrap_or_default(),
            role: user.role.parse().map_err(|_| {
                AppError::Unknown(format!("User {} has unrecognised role {}", user.id, user.role))
            })?,
            is_deleted: user.is_deleted,
        })
    }
}

/// Login lookup row; the only place the password hash leaves the database.
#[derive(sqlx::FromRow)]
pub struct DbCredentials {
    pub id: i64,
    pub password: String,
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

impl SessionContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<User> for SessionContext {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role,
        }
    }
}
