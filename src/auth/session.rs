use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::RngCore;
use serde::Serialize;

use crate::error::AppError;

use super::{Role, SessionContext};

/// 256 bits of token entropy.
pub const TOKEN_BYTES: usize = 32;

/// Lifecycle of a server-side session. Expiry is detected lazily on validation;
/// revocation removes the row, so there is no way back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub last_accessed_at: NaiveDateTime,
}

impl UserSession {
    pub fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn state_at(&self, now: NaiveDateTime) -> SessionState {
        if now >= self.expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }
}

/// A session row joined with its owner, as read by token validation.
#[derive(sqlx::FromRow, Clone)]
pub struct DbSessionWithUser {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub last_accessed_at: NaiveDateTime,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
    pub is_deleted: bool,
}

impl DbSessionWithUser {
    pub fn session(&self) -> UserSession {
        UserSession {
            id: self.id,
            user_id: self.user_id,
            token: self.token.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed_at: self.last_accessed_at,
        }
    }

    /// Sessions owned by soft-deleted users count as revoked.
    pub fn state_at(&self, now: NaiveDateTime) -> SessionState {
        if self.is_deleted {
            return SessionState::Revoked;
        }
        self.session().state_at(now)
    }

    pub fn context(&self) -> Result<SessionContext, AppError> {
        let role: Role = self.role.parse().map_err(|_| {
            AppError::Unknown(format!(
                "User {} has unrecognised role {}",
                self.user_id, self.role
            ))
        })?;

        Ok(SessionContext {
            user_id: self.user_id,
            username: self.username.clone(),
            display_name: self.display_name.clone().unwrap_or_default(),
            role,
        })
    }
}

/// What a successful login hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
