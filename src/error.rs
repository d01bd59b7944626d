use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Span, error, warn};

use crate::config::AppConfig;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Session expired")]
    Expired,

    #[error("Session revoked")]
    Revoked,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Too many progress update requests. Please slow down.")]
    RateLimited { retry_after_secs: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Unknown(String),
}

/// Wire body for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl AppError {
    /// Stable, client-facing error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Expired => "expired",
            AppError::Revoked => "revoked",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidReference(_) => "invalid_reference",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Validation(_) => "validation",
            AppError::Database(_) | AppError::Unavailable(_) => "unavailable",
            AppError::Unknown(_) => "unknown",
        }
    }

    /// Failures that reject the presented session rather than the request.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Unauthenticated | AppError::Expired | AppError::Revoked
        )
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        let kind = self.kind();

        match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
            }
            AppError::Unavailable(msg) => {
                error!(message = %msg, context = %ctx, "Persistence unavailable");
            }
            AppError::Unknown(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
            }
            _ => {
                warn!(kind = %kind, message = %message, context = %ctx, "Request rejected");
            }
        }

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(kind));
            current_span.record("error.message", tracing::field::display(&message));

            if self.is_server_fault() {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }

    fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Unavailable(_) | AppError::Unknown(_)
        )
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::InvalidCredentials
            | AppError::Unauthenticated
            | AppError::Expired
            | AppError::Revoked => Status::Unauthorized,
            AppError::Forbidden(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::InvalidReference(_) => Status::BadRequest,
            AppError::RateLimited { .. } => Status::TooManyRequests,
            AppError::Validation(_) => Status::UnprocessableEntity,
            AppError::Database(_) | AppError::Unavailable(_) => Status::ServiceUnavailable,
            AppError::Unknown(_) => Status::InternalServerError,
        }
    }

    /// Server faults keep their detail out of responses unless explicitly enabled.
    pub fn to_body(&self, expose_details: bool) -> ErrorBody {
        let message = if self.is_server_fault() && !expose_details {
            match self {
                AppError::Unknown(_) => "An unexpected error occurred".to_string(),
                _ => "Service temporarily unavailable".to_string(),
            }
        } else {
            self.to_string()
        };

        let retry_after_secs = match self {
            AppError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        ErrorBody {
            error: self.kind().to_string(),
            message,
            retry_after_secs,
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        self.log_and_record(&format!("Request to {} {}", req.method(), req.uri()));

        let expose_details = req
            .rocket()
            .state::<AppConfig>()
            .map(|config| config.expose_error_details)
            .unwrap_or(false);

        Custom(self.status_code(), Json(self.to_body(expose_details))).respond_to(req)
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Unknown(format!("Cryptography error: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Unknown(format!("Migration error: {}", error))
    }
}

impl From<rocket::tokio::task::JoinError> for AppError {
    fn from(error: rocket::tokio::task::JoinError) -> Self {
        AppError::Unknown(format!("Background task failed: {}", error))
    }
}

impl From<rocket::tokio::time::error::Elapsed> for AppError {
    fn from(_: rocket::tokio::time::error::Elapsed) -> Self {
        AppError::Unavailable("Persistence call timed out".to_string())
    }
}
