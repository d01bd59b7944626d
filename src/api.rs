use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::{Request, Shutdown, State};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::auth::{
    AuthService, Role, SESSION_COOKIE, SessionContext, SessionToken, require_role,
};
use crate::broadcast::Broadcaster;
use crate::config::AppConfig;
use crate::db;
use crate::error::{AppError, ErrorBody};
use crate::models::{FolderSummary, OverallSummary, ProgressAuditEntry, ProgressRecord, ProgressUpdate};
use crate::progress::{ProgressEntry, ProgressLedger};
use crate::validation::ValidateExt;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, max = 256, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub role: Role,
}

impl From<&SessionContext> for UserData {
    fn from(ctx: &SessionContext) -> Self {
        Self {
            id: ctx.user_id,
            username: ctx.username.clone(),
            name: ctx.display_name.clone(),
            role: ctx.role,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserData,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub completed_videos: Vec<i64>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    auth: &State<AuthService>,
    ledger: &State<ProgressLedger>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, AppError> {
    let login = login.into_inner().validate_request()?;
    info!(username = %login.username, "Login attempt");

    let issued = auth.authenticate(&login.username, &login.password).await?;

    let max_age = rocket::time::Duration::seconds(config.session_lifetime.as_secs() as i64);
    cookies.add_private(
        Cookie::build((SESSION_COOKIE, issued.token.clone()))
            .same_site(SameSite::Lax)
            .http_only(true)
            .path("/")
            .max_age(max_age),
    );

    let completed_videos = ledger.completed_video_ids(issued.context.user_id).await?;

    Ok(Json(LoginResponse {
        user: UserData::from(&issued.context),
        session_token: issued.token,
        expires_at: issued.expires_at,
        completed_videos,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[post("/logout")]
pub async fn api_logout(
    token: Option<SessionToken>,
    cookies: &CookieJar<'_>,
    auth: &State<AuthService>,
) -> Result<Json<MessageResponse>, AppError> {
    if let Some(SessionToken(token)) = token {
        auth.revoke(&token).await?;
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE).path("/"));

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    #[serde(flatten)]
    pub user: UserData,
    pub completed_videos: Vec<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct SessionResponse {
    pub user: SessionUser,
}

#[get("/session")]
pub async fn api_session(
    ctx: SessionContext,
    ledger: &State<ProgressLedger>,
) -> Result<Json<SessionResponse>, AppError> {
    let completed_videos = ledger.completed_video_ids(ctx.user_id).await?;

    Ok(Json(SessionResponse {
        user: SessionUser {
            user: UserData::from(&ctx),
            completed_videos,
        },
    }))
}

/// Either a single `{video_id, completed}` or a batch under `updates`.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ProgressUpdateRequest {
    Batch { updates: Vec<ProgressUpdate> },
    Single(ProgressUpdate),
}

impl ProgressUpdateRequest {
    pub fn into_updates(self) -> Vec<ProgressUpdate> {
        match self {
            ProgressUpdateRequest::Batch { updates } => updates,
            ProgressUpdateRequest::Single(update) => vec![update],
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateResponse {
    pub message: String,
    pub updated_progress: Vec<ProgressRecord>,
    pub progress_summary: Vec<FolderSummary>,
}

#[post("/progress/<username>", data = "<request>")]
pub async fn api_update_progress(
    username: &str,
    request: Json<ProgressUpdateRequest>,
    ctx: SessionContext,
    ledger: &State<ProgressLedger>,
) -> Result<Json<ProgressUpdateResponse>, AppError> {
    let updates = request.into_inner().into_updates();

    let outcome = ledger.update_progress(&ctx, username, &updates).await?;

    Ok(Json(ProgressUpdateResponse {
        message: "Progress updated successfully".to_string(),
        updated_progress: outcome.updated,
        progress_summary: outcome.summary,
    }))
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub progress: BTreeMap<i64, ProgressEntry>,
    pub progress_summary: Vec<FolderSummary>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[get("/progress/<username>")]
pub async fn api_get_progress(
    username: &str,
    ctx: SessionContext,
    ledger: &State<ProgressLedger>,
) -> Result<Json<ProgressResponse>, AppError> {
    let snapshot = ledger.progress_snapshot(&ctx, username).await?;

    Ok(Json(ProgressResponse {
        progress: snapshot.progress,
        progress_summary: snapshot.summary,
        last_updated: snapshot.last_updated,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct SummaryResponse {
    pub folders: Vec<FolderSummary>,
    pub overall: OverallSummary,
}

#[get("/progress/summary/<username>")]
pub async fn api_get_progress_summary(
    username: &str,
    ctx: SessionContext,
    ledger: &State<ProgressLedger>,
) -> Result<Json<SummaryResponse>, AppError> {
    let summary = ledger.progress_summary(&ctx, username).await?;

    Ok(Json(SummaryResponse {
        folders: summary.folders,
        overall: summary.overall,
    }))
}

#[get("/progress/audit/<username>")]
pub async fn api_get_progress_audit(
    username: &str,
    ctx: SessionContext,
    ledger: &State<ProgressLedger>,
) -> Result<Json<Vec<ProgressAuditEntry>>, AppError> {
    Ok(Json(ledger.audit_trail(&ctx, username).await?))
}

#[get("/sse/progress")]
pub fn api_sse_progress(
    ctx: SessionContext,
    broadcaster: &State<Broadcaster>,
    mut shutdown: Shutdown,
) -> EventStream![] {
    let mut handle = broadcaster.subscribe(ctx.user_id, ctx.role);

    EventStream! {
        loop {
            let event = select! {
                biased;
                event = handle.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = &mut shutdown => break,
            };

            yield Event::json(&event);
        }
    }
    .heartbeat(None)
}

#[derive(Deserialize, Validate)]
pub struct SystemMessageRequest {
    #[validate(length(min = 1, max = 1000, message = "Message is required"))]
    message: String,
    message_type: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct SystemMessageResponse {
    pub delivered: usize,
}

#[post("/admin/broadcast", data = "<request>")]
pub async fn api_admin_broadcast(
    request: Json<SystemMessageRequest>,
    ctx: SessionContext,
    broadcaster: &State<Broadcaster>,
) -> Result<Json<SystemMessageResponse>, AppError> {
    require_role(&ctx, Role::Admin)?;
    let request = request.into_inner().validate_request()?;

    let message_type = request.message_type.as_deref().unwrap_or("info");
    let delivered = broadcaster.broadcast_system_message(message_type, &request.message);

    Ok(Json(SystemMessageResponse { delivered }))
}

/// Soft delete; the user's sessions stop validating immediately and are then removed,
/// and any open progress streams are closed.
#[delete("/admin/users/<id>")]
pub async fn api_admin_delete_user(
    id: i64,
    ctx: SessionContext,
    auth: &State<AuthService>,
    broadcaster: &State<Broadcaster>,
) -> Result<Status, AppError> {
    require_role(&ctx, Role::Admin)?;

    if id == ctx.user_id {
        return Err(AppError::Validation(
            "Administrators cannot delete their own account".to_string(),
        ));
    }

    db::set_user_deleted(auth.pool(), id, true).await?;
    let revoked = auth.revoke_all_for_user(id).await?;
    let closed = broadcaster.disconnect_user(id);
    info!(user_id = id, revoked = revoked, streams = closed, "User soft-deleted");

    Ok(Status::NoContent)
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[catch(default)]
pub fn default_api(status: Status, _req: &Request<'_>) -> Custom<Json<ErrorBody>> {
    let error = match status.code {
        400 => "bad_request",
        404 => "not_found",
        422 => "validation",
        _ => "unknown",
    };

    Custom(
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message: status.reason_lossy().to_string(),
            retry_after_secs: None,
        }),
    )
}
