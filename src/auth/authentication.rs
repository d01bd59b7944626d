use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use tracing::Instrument;

use crate::error::{AppError, ErrorBody};

use super::{AuthService, SessionContext};

pub const SESSION_COOKIE: &str = "session_token";

/// The raw token presented by the client: private cookie first, then bearer header.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

impl SessionToken {
    fn extract(request: &Request<'_>) -> Option<Self> {
        if let Some(cookie) = request.cookies().get_private(SESSION_COOKIE) {
            return Some(SessionToken(cookie.value().to_string()));
        }

        request
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| SessionToken(token.trim().to_string()))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match SessionToken::extract(request) {
            Some(token) => Outcome::Success(token),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

/// Error kind of a rejected guard, stashed for the catchers.
struct AuthFailure(Option<AppErrorSnapshot>);

#[derive(Clone)]
struct AppErrorSnapshot {
    status: Status,
    kind: &'static str,
    message: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionContext {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth = match request.rocket().state::<AuthService>() {
            Some(auth) => auth,
            _ => {
                tracing::error!("Auth service not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        let token = SessionToken::extract(request);

        let validation = auth
            .validate(token.as_ref().map(|t| t.0.as_str()))
            .instrument(tracing::info_span!("session_guard"))
            .await;

        match validation {
            Ok(ctx) => {
                tracing::debug!(username = %ctx.username, role = %ctx.role, "Session validated");
                Outcome::Success(ctx)
            }
            Err(err) => {
                err.log_and_record("session guard");
                let body = err.to_body(false);
                let status = err.status_code();
                request.local_cache(|| {
                    AuthFailure(Some(AppErrorSnapshot {
                        status,
                        kind: err.kind(),
                        message: body.message,
                    }))
                });
                Outcome::Error((status, ()))
            }
        }
    }
}

fn failure_body(req: &Request<'_>, fallback: AppError) -> Custom<Json<ErrorBody>> {
    let AuthFailure(snapshot) = req.local_cache(|| AuthFailure(None));

    match snapshot {
        Some(snapshot) => Custom(
            snapshot.status,
            Json(ErrorBody {
                error: snapshot.kind.to_string(),
                message: snapshot.message.clone(),
                retry_after_secs: None,
            }),
        ),
        None => Custom(fallback.status_code(), Json(fallback.to_body(false))),
    }
}

#[catch(401)]
pub fn unauthorized_api(req: &Request<'_>) -> Custom<Json<ErrorBody>> {
    failure_body(req, AppError::Unauthenticated)
}

#[catch(403)]
pub fn forbidden_api(req: &Request<'_>) -> Custom<Json<ErrorBody>> {
    failure_body(req, AppError::Forbidden("Access denied".to_string()))
}

#[catch(503)]
pub fn unavailable_api(req: &Request<'_>) -> Custom<Json<ErrorBody>> {
    failure_body(
        req,
        AppError::Unavailable("Service temporarily unavailable".to_string()),
    )
}
