use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// One row of `resume_drafts`. Scalar fields shown on the dashboard live in
/// columns; the rest of the snapshot is stored in `content`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DraftRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub target_job: String,
    pub current_step_id: Option<String>,
    pub content: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DraftSummaryRow {
    pub id: Uuid,
    pub title: String,
    pub target_job: String,
    pub current_step_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}
