use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::OnceCell;
use rocket::tokio::{self, task::JoinHandle};
use sqlx::{Pool, Sqlite};
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::db;
use crate::error::AppError;

use super::{IssuedSession, SessionContext, SessionState, UserSession};

/// Compared against when the username is unknown so both failure paths pay for a bcrypt verify.
const DUMMY_PASSWORD: &str = "course-progress-dummy-password";

/// Delay before the first sweep so startup is not competing with housekeeping.
const SWEEP_STARTUP_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AuthService {
    pool: Pool<Sqlite>,
    session_lifetime: Duration,
    bcrypt_cost: u32,
    persistence_timeout: Duration,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(pool: Pool<Sqlite>, config: &AppConfig) -> Self {
        Self {
            pool,
            session_lifetime: config.session_lifetime,
            bcrypt_cost: config.bcrypt_cost,
            persistence_timeout: config.persistence_timeout,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    /// Unknown user and wrong password are reported identically.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<IssuedSession, AppError> {
        info!("Authenticating user");

        let credentials = self
            .bounded(db::get_credentials(&self.pool, username))
            .await?;

        let (user_id, hash) = match credentials {
            Some(credentials) => (Some(credentials.id), credentials.password),
            None => (None, self.dummy_hash().await?),
        };

        let password_matches = verify_password(password.to_string(), hash).await?;

        let user_id = match (user_id, password_matches) {
            (Some(id), true) => id,
            _ => {
                warn!("Authentication failed");
                return Err(AppError::InvalidCredentials);
            }
        };

        let user = self.bounded(db::get_user(&self.pool, user_id)).await?;

        let token = UserSession::generate_token();
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(self.session_lifetime)
            .ok()
            .and_then(|lifetime| created_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AppError::Unknown(format!(
                    "Session lifetime of {}s is out of range",
                    self.session_lifetime.as_secs()
                ))
            })?;

        self.bounded(db::create_user_session(
            &self.pool,
            user_id,
            &token,
            created_at.naive_utc(),
            expires_at.naive_utc(),
        ))
        .await?;

        info!(user_id = user_id, expires_at = %expires_at, "Session issued");

        Ok(IssuedSession {
            token,
            context: SessionContext::from(user),
            created_at,
            expires_at,
        })
    }

    #[instrument(skip_all)]
    pub async fn validate(&self, token: Option<&str>) -> Result<SessionContext, AppError> {
        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AppError::Unauthenticated),
        };

        let row = self
            .bounded(db::get_session_with_user(&self.pool, token))
            .await?
            .ok_or(AppError::Revoked)?;

        let now = Utc::now().naive_utc();
        match row.state_at(now) {
            SessionState::Revoked => return Err(AppError::Revoked),
            SessionState::Expired => return Err(AppError::Expired),
            SessionState::Active => {}
        }

        // Best effort: a failed touch never fails the request.
        if let Err(err) = self.bounded(db::touch_session(&self.pool, token, now)).await {
            warn!(error = %err, "Failed to refresh session access time");
        }

        row.context()
    }

    /// Idempotent; unknown tokens are not an error.
    #[instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> Result<(), AppError> {
        let removed = db::invalidate_session(&self.pool, token).await?;
        info!(removed = removed, "Session revoked");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, AppError> {
        db::invalidate_user_sessions(&self.pool, user_id).await
    }

    pub async fn sweep_expired(&self) -> Result<u64, AppError> {
        db::clean_expired_sessions(&self.pool, Utc::now().naive_utc()).await
    }

    /// Housekeeping only: `validate` rejects expired tokens whether or not they were swept.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(SWEEP_STARTUP_DELAY).await;

            loop {
                match service.sweep_expired().await {
                    Ok(count) => {
                        if count > 0 {
                            info!("Cleaned up {} expired sessions", count);
                        }
                    }
                    Err(e) => {
                        error!("Failed to clean expired sessions: {}", e);
                    }
                }

                tokio::time::sleep(interval).await;
            }
        })
    }

    async fn dummy_hash(&self) -> Result<String, AppError> {
        if let Some(hash) = self.dummy_hash.get() {
            return Ok(hash.clone());
        }

        let hash = hash_password(DUMMY_PASSWORD.to_string(), self.bcrypt_cost).await?;
        Ok(self.dummy_hash.get_or_init(|| hash).clone())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.persistence_timeout, fut).await?
    }
}

pub async fn hash_password(password: String, cost: u32) -> Result<String, AppError> {
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hash)
}

/// A malformed stored hash is treated as a mismatch.
pub async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    let result = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await?;

    match result {
        Ok(valid) => Ok(valid),
        Err(e) => {
            warn!(error = %e, "Stored password hash could not be verified");
            Ok(false)
        }
    }
}
