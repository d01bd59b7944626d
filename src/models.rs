use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

fn utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)
}

/// One requested change in a progress batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub video_id: i64,
    pub completed: bool,
}

/// Current completion state for a (user, video) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(skip_serializing)]
    #[serde(default)]
    pub user_id: i64,
    pub video_id: i64,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbProgressRecord {
    pub user_id: i64,
    pub video_id: i64,
    pub completed: bool,
    pub updated_at: NaiveDateTime,
}

impl From<DbProgressRecord> for ProgressRecord {
    fn from(db: DbProgressRecord) -> Self {
        Self {
            user_id: db.user_id,
            video_id: db.video_id,
            completed: db.completed,
            updated_at: utc(db.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressAuditEntry {
    pub id: i64,
    pub actor_id: i64,
    pub subject_id: i64,
    pub video_id: i64,
    pub completed_after: bool,
    pub changed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbProgressAuditEntry {
    pub id: i64,
    pub actor_id: i64,
    pub subject_id: i64,
    pub video_id: i64,
    pub completed_after: bool,
    pub changed_at: NaiveDateTime,
}

impl From<DbProgressAuditEntry> for ProgressAuditEntry {
    fn from(db: DbProgressAuditEntry) -> Self {
        Self {
            id: db.id,
            actor_id: db.actor_id,
            subject_id: db.subject_id,
            video_id: db.video_id,
            completed_after: db.completed_after,
            changed_at: utc(db.changed_at),
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct FolderCount {
    pub folder: String,
    pub total_videos: i64,
    pub completed_videos: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSummary {
    pub folder: String,
    pub total_videos: i64,
    pub completed_videos: i64,
    pub completion_percentage: f64,
}

impl From<FolderCount> for FolderSummary {
    fn from(count: FolderCount) -> Self {
        Self {
            completion_percentage: completion_percentage(count.completed_videos, count.total_videos),
            folder: count.folder,
            total_videos: count.total_videos,
            completed_videos: count.completed_videos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    pub total_videos: i64,
    pub total_completed: i64,
    pub percentage: f64,
}

impl OverallSummary {
    pub fn from_folders(folders: &[FolderSummary]) -> Self {
        let total_videos = folders.iter().map(|f| f.total_videos).sum();
        let total_completed = folders.iter().map(|f| f.completed_videos).sum();

        Self {
            total_videos,
            total_completed,
            percentage: completion_percentage(total_completed, total_videos),
        }
    }
}

/// `completed / total * 100` rounded to two decimal places; 0 for an empty folder.
pub fn completion_percentage(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }

    let raw = completed as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
