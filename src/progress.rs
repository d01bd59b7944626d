use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::auth::{Role, SessionContext, require_role, require_self_or_admin};
use crate::broadcast::{Broadcaster, StreamEvent};
use crate::db;
use crate::error::AppError;
use crate::models::{
    FolderSummary, OverallSummary, ProgressAuditEntry, ProgressRecord, ProgressUpdate,
};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdateOutcome {
    pub subject_id: i64,
    pub updated: Vec<ProgressRecord>,
    pub summary: Vec<FolderSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub progress: BTreeMap<i64, ProgressEntry>,
    pub summary: Vec<FolderSummary>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub folders: Vec<FolderSummary>,
    pub overall: OverallSummary,
}

/// Validate, rate limit, persist and announce progress changes.
pub struct ProgressLedger {
    pool: Pool<Sqlite>,
    limiter: RateLimiter,
    broadcaster: Broadcaster,
}

impl ProgressLedger {
    pub fn new(pool: Pool<Sqlite>, limiter: RateLimiter, broadcaster: Broadcaster) -> Self {
        Self {
            pool,
            limiter,
            broadcaster,
        }
    }

    /// All-or-nothing: either every update and its audit row commit, or none do.
    /// The broadcast happens strictly after commit and before anything else can fail.
    #[instrument(skip(self, actor, updates), fields(actor = %actor.username, batch = updates.len()))]
    pub async fn update_progress(
        &self,
        actor: &SessionContext,
        subject_username: &str,
        updates: &[ProgressUpdate],
    ) -> Result<ProgressUpdateOutcome, AppError> {
        require_self_or_admin(actor, subject_username)?;

        if updates.is_empty() {
            return Err(AppError::Validation(
                "At least one progress update is required".to_string(),
            ));
        }

        if actor.role != Role::Admin {
            self.limiter.check(actor.user_id)?;
        }

        let mut tx = self.pool.begin().await?;

        let subject_id = db::find_active_user_id(&mut tx, subject_username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", subject_username)))?;

        let requested: Vec<i64> = updates
            .iter()
            .map(|u| u.video_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let found: HashSet<i64> = db::find_active_video_ids(&mut tx, &requested)
            .await?
            .into_iter()
            .collect();

        let mut missing: Vec<i64> = requested
            .into_iter()
            .filter(|id| !found.contains(id))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            warn!(missing = ?missing, "Progress batch references unknown videos");
            return Err(AppError::InvalidReference(format!(
                "One or more video IDs are invalid: {:?}",
                missing
            )));
        }

        let now = Utc::now().naive_utc();
        let mut updated = Vec::with_capacity(updates.len());

        for update in updates {
            let record = db::upsert_progress(
                &mut tx,
                subject_id,
                update.video_id,
                update.completed,
                now,
            )
            .await?;

            db::insert_progress_audit(
                &mut tx,
                actor.user_id,
                subject_id,
                update.video_id,
                update.completed,
                now,
            )
            .await?;

            updated.push(record);
        }

        tx.commit().await?;

        info!(subject_id = subject_id, count = updated.len(), "Progress committed");

        // Nothing fallible may run between commit and broadcast.
        self.broadcaster.broadcast(StreamEvent::progress_update(
            subject_id,
            subject_username,
            updated.clone(),
        ));

        let summary = self
            .folder_summary(subject_id)
            .await
            .inspect_err(|err| warn!(error = %err, "Summary read failed after commit"))?;

        Ok(ProgressUpdateOutcome {
            subject_id,
            updated,
            summary,
        })
    }

    #[instrument(skip(self, actor), fields(actor = %actor.username))]
    pub async fn progress_snapshot(
        &self,
        actor: &SessionContext,
        subject_username: &str,
    ) -> Result<ProgressSnapshot, AppError> {
        require_self_or_admin(actor, subject_username)?;
        let subject = self.resolve_subject(subject_username).await?;

        let records = db::get_progress_for_user(&self.pool, subject).await?;
        let last_updated = records.iter().map(|r| r.updated_at).max();
        let progress = records
            .into_iter()
            .map(|r| {
                (
                    r.video_id,
                    ProgressEntry {
                        completed: r.completed,
                        updated_at: r.updated_at,
                    },
                )
            })
            .collect();

        Ok(ProgressSnapshot {
            progress,
            summary: self.folder_summary(subject).await?,
            last_updated,
        })
    }

    #[instrument(skip(self, actor), fields(actor = %actor.username))]
    pub async fn progress_summary(
        &self,
        actor: &SessionContext,
        subject_username: &str,
    ) -> Result<ProgressSummary, AppError> {
        require_self_or_admin(actor, subject_username)?;
        let subject = self.resolve_subject(subject_username).await?;

        let folders = self.folder_summary(subject).await?;
        let overall = OverallSummary::from_folders(&folders);

        Ok(ProgressSummary { folders, overall })
    }

    /// Admin-only view of who changed what for a subject, in append order.
    #[instrument(skip(self, actor), fields(actor = %actor.username))]
    pub async fn audit_trail(
        &self,
        actor: &SessionContext,
        subject_username: &str,
    ) -> Result<Vec<ProgressAuditEntry>, AppError> {
        require_role(actor, Role::Admin)?;
        let subject = self.resolve_subject(subject_username).await?;

        db::get_audit_entries(&self.pool, subject).await
    }

    pub async fn completed_video_ids(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        db::get_completed_video_ids(&self.pool, user_id).await
    }

    async fn folder_summary(&self, user_id: i64) -> Result<Vec<FolderSummary>, AppError> {
        let counts = db::get_folder_counts(&self.pool, user_id).await?;
        Ok(counts.into_iter().map(FolderSummary::from).collect())
    }

    async fn resolve_subject(&self, username: &str) -> Result<i64, AppError> {
        db::find_active_user_by_username(&self.pool, username)
            .await?
            .map(|user| user.id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", username)))
    }
}
