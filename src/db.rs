use crate::{
    auth::{DbCredentials, DbSessionWithUser, DbUser, Role, User},
    error::AppError,
};
use chrono::NaiveDateTime;
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::models::{
    DbProgressAuditEntry, DbProgressRecord, FolderCount, ProgressAuditEntry, ProgressRecord,
};

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, display_name, role, is_deleted FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

/// Exact, case-sensitive match among users that are not soft-deleted.
#[instrument]
pub async fn find_active_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding active user by username");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, display_name, role, is_deleted FROM users
         WHERE username = ? AND is_deleted = FALSE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip(pool))]
pub async fn get_credentials(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<DbCredentials>, AppError> {
    let row = sqlx::query_as::<_, DbCredentials>(
        "SELECT id, password FROM users WHERE username = ? AND is_deleted = FALSE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[instrument(skip(pool, password_hash))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password_hash: &str,
    role: Role,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing_user = sqlx::query("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing_user.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let res = sqlx::query(
        "INSERT INTO users (username, display_name, password, role) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(display_name.unwrap_or(username))
    .bind(password_hash)
    .bind(role.as_str())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn set_user_deleted(
    pool: &Pool<Sqlite>,
    user_id: i64,
    deleted: bool,
) -> Result<(), AppError> {
    info!("Toggling user deleted flag");

    let res = sqlx::query("UPDATE users SET is_deleted = ? WHERE id = ?")
        .bind(deleted)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User with id {} not found", user_id)));
    }

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    created_at: NaiveDateTime,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query(
        "INSERT INTO user_sessions (user_id, token, created_at, expires_at, last_accessed_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(created_at)
    .bind(expires_at)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_with_user(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<Option<DbSessionWithUser>, AppError> {
    let row = sqlx::query_as::<_, DbSessionWithUser>(
        "SELECT s.id, s.user_id, s.token, s.created_at, s.expires_at, s.last_accessed_at,
                u.username, u.display_name, u.role, u.is_deleted
         FROM user_sessions s
         JOIN users u ON s.user_id = u.id
         WHERE s.token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[instrument(skip(pool, token))]
pub async fn touch_session(
    pool: &Pool<Sqlite>,
    token: &str,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    sqlx::query("UPDATE user_sessions SET last_accessed_at = ? WHERE token = ?")
        .bind(now)
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<u64, AppError> {
    info!("Invalidating session");

    let result = sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(pool))]
pub async fn invalidate_user_sessions(pool: &Pool<Sqlite>, user_id: i64) -> Result<u64, AppError> {
    info!("Invalidating all sessions for user");

    let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(
    pool: &Pool<Sqlite>,
    now: NaiveDateTime,
) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument]
pub async fn create_video(
    pool: &Pool<Sqlite>,
    title: &str,
    folder: &str,
    position: i64,
) -> Result<i64, AppError> {
    info!("Creating video");
    let res = sqlx::query("INSERT INTO videos (title, folder, position) VALUES (?, ?, ?)")
        .bind(title)
        .bind(folder)
        .bind(position)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn set_video_deleted(
    pool: &Pool<Sqlite>,
    video_id: i64,
    deleted: bool,
) -> Result<(), AppError> {
    info!("Toggling video deleted flag");
    sqlx::query("UPDATE videos SET is_deleted = ? WHERE id = ?")
        .bind(deleted)
        .bind(video_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns the subset of `video_ids` that exist and are not soft-deleted.
#[instrument(skip(conn))]
pub async fn find_active_video_ids(
    conn: &mut SqliteConnection,
    video_ids: &[i64],
) -> Result<Vec<i64>, AppError> {
    if video_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query =
        QueryBuilder::<Sqlite>::new("SELECT id FROM videos WHERE is_deleted = FALSE AND id IN (");
    let mut separated = query.separated(", ");
    for id in video_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let ids: Vec<i64> = query.build_query_scalar::<i64>().fetch_all(conn).await?;

    Ok(ids)
}

#[instrument(skip(conn))]
pub async fn find_active_user_id(
    conn: &mut SqliteConnection,
    username: &str,
) -> Result<Option<i64>, AppError> {
    let id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM users WHERE username = ? AND is_deleted = FALSE")
            .bind(username)
            .fetch_optional(conn)
            .await?;

    Ok(id)
}

#[instrument(skip(conn))]
pub async fn upsert_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    video_id: i64,
    completed: bool,
    now: NaiveDateTime,
) -> Result<ProgressRecord, AppError> {
    let row = sqlx::query_as::<_, DbProgressRecord>(
        "INSERT INTO progress (user_id, video_id, completed, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, video_id)
         DO UPDATE SET completed = excluded.completed, updated_at = excluded.updated_at
         RETURNING user_id, video_id, completed, updated_at",
    )
    .bind(user_id)
    .bind(video_id)
    .bind(completed)
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(ProgressRecord::from(row))
}

#[instrument(skip(conn))]
pub async fn insert_progress_audit(
    conn: &mut SqliteConnection,
    actor_id: i64,
    subject_id: i64,
    video_id: i64,
    completed_after: bool,
    now: NaiveDateTime,
) -> Result<i64, AppError> {
    let res = sqlx::query(
        "INSERT INTO progress_audit (actor_id, subject_id, video_id, completed_after, changed_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(actor_id)
    .bind(subject_id)
    .bind(video_id)
    .bind(completed_after)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_progress_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<ProgressRecord>, AppError> {
    let rows = sqlx::query_as::<_, DbProgressRecord>(
        "SELECT user_id, video_id, completed, updated_at FROM progress
         WHERE user_id = ?
         ORDER BY video_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProgressRecord::from).collect())
}

#[instrument]
pub async fn get_completed_video_ids(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<i64>, AppError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT p.video_id FROM progress p
         JOIN videos v ON v.id = p.video_id
         WHERE p.user_id = ? AND p.completed = TRUE AND v.is_deleted = FALSE
         ORDER BY p.video_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Per-folder counts over non-deleted videos; a `completed = FALSE` row counts as absent.
#[instrument]
pub async fn get_folder_counts(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<FolderCount>, AppError> {
    let rows = sqlx::query_as::<_, FolderCount>(
        "SELECT v.folder AS folder,
                COUNT(v.id) AS total_videos,
                COUNT(p.id) AS completed_videos
         FROM videos v
         LEFT JOIN progress p
           ON v.id = p.video_id AND p.user_id = ? AND p.completed = TRUE
         WHERE v.is_deleted = FALSE
         GROUP BY v.folder
         ORDER BY v.folder",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_audit_entries(
    pool: &Pool<Sqlite>,
    subject_id: i64,
) -> Result<Vec<ProgressAuditEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbProgressAuditEntry>(
        "SELECT id, actor_id, subject_id, video_id, completed_after, changed_at
         FROM progress_audit
         WHERE subject_id = ?
         ORDER BY id",
    )
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProgressAuditEntry::from).collect())
}
