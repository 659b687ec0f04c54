//! Draft Store — remote persistence of résumé drafts.
//!
//! `PgDraftStore` is the production backend; `InMemoryDraftStore` backs the
//! `memory` storage mode and the test suite. Both enforce ownership the same
//! way: a draft that exists under another owner is `Forbidden`, never
//! silently `NotFound`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::draft::{DraftRow, DraftSummaryRow};
use crate::wizard::snapshot::{DraftId, DraftSnapshot, PersonalInfo, Sections};
use crate::wizard::steps::StepId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Draft {0} not found")]
    NotFound(DraftId),

    #[error("Draft {0} belongs to another user")]
    Forbidden(DraftId),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Corrupt draft content: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Draft store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

impl StoreError {
    /// Failures that make the draft unusable for this user, as opposed to
    /// transient ones worth retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::Forbidden(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftSummary {
    pub id: DraftId,
    pub title: String,
    pub target_job: String,
    pub current_step_id: Option<StepId>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn fetch_by_id(&self, owner: Uuid, id: DraftId) -> Result<DraftSnapshot, StoreError>;

    /// Creates the draft when `snapshot.id` is `None`, updates it otherwise.
    /// The returned snapshot always carries an id.
    async fn save(&self, owner: Uuid, snapshot: &DraftSnapshot)
        -> Result<DraftSnapshot, StoreError>;

    async fn delete_by_id(&self, owner: Uuid, id: DraftId) -> Result<(), StoreError>;

    async fn list_for_owner(&self, owner: Uuid) -> Result<Vec<DraftSummary>, StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ────────────────────────────────────────────────────────────────────────────

/// The part of a snapshot kept in the `content` JSONB column.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct DraftContent {
    personal_info: PersonalInfo,
    professional_summary: String,
    sections: Sections,
}

pub struct PgDraftStore {
    pool: PgPool,
}

impl PgDraftStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolves why a query scoped to `(id, owner)` matched nothing.
    async fn missing_or_forbidden(&self, owner: Uuid, id: DraftId) -> StoreError {
        let found: Result<Option<Uuid>, sqlx::Error> =
            sqlx::query_scalar("SELECT user_id FROM resume_drafts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match found {
            Ok(Some(other)) => {
                warn!("User {owner} attempted to access draft {id} owned by {other}");
                StoreError::Forbidden(id)
            }
            Ok(None) => StoreError::NotFound(id),
            Err(e) => StoreError::from(e),
        }
    }
}

fn row_to_snapshot(row: DraftRow) -> Result<DraftSnapshot, StoreError> {
    let content: DraftContent = serde_json::from_value(row.content)?;
    Ok(DraftSnapshot {
        id: Some(DraftId(row.id)),
        title: row.title,
        target_job: row.target_job,
        personal_info: content.personal_info,
        professional_summary: content.professional_summary,
        sections: content.sections,
        current_step_id: parse_step(row.id, row.current_step_id.as_deref()),
    })
}

fn parse_step(id: Uuid, raw: Option<&str>) -> Option<StepId> {
    let raw = raw?;
    let step = StepId::parse(raw);
    if step.is_none() {
        warn!("Draft {id} has unknown current_step_id '{raw}'; ignoring");
    }
    step
}

#[async_trait]
impl DraftStore for PgDraftStore {
    async fn fetch_by_id(&self, owner: Uuid, id: DraftId) -> Result<DraftSnapshot, StoreError> {
        let row: Option<DraftRow> = sqlx::query_as("SELECT * FROM resume_drafts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or(StoreError::NotFound(id))?;
        if row.user_id != owner {
            warn!("User {owner} attempted to read draft {id}");
            return Err(StoreError::Forbidden(id));
        }
        row_to_snapshot(row)
    }

    async fn save(
        &self,
        owner: Uuid,
        snapshot: &DraftSnapshot,
    ) -> Result<DraftSnapshot, StoreError> {
        let content = serde_json::to_value(DraftContent {
            personal_info: snapshot.personal_info.clone(),
            professional_summary: snapshot.professional_summary.clone(),
            sections: snapshot.sections.clone(),
        })?;
        let step = snapshot.current_step_id.map(|s| s.as_str());

        let row: DraftRow = match snapshot.id {
            None => {
                let row: DraftRow = sqlx::query_as(
                    r#"
                    INSERT INTO resume_drafts
                        (user_id, title, target_job, current_step_id, content)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING *
                    "#,
                )
                .bind(owner)
                .bind(&snapshot.title)
                .bind(&snapshot.target_job)
                .bind(step)
                .bind(&content)
                .fetch_one(&self.pool)
                .await?;
                info!("Created draft {} for user {owner}", row.id);
                row
            }
            Some(id) => {
                let row: Option<DraftRow> = sqlx::query_as(
                    r#"
                    UPDATE resume_drafts
                    SET title = $3,
                        target_job = $4,
                        current_step_id = $5,
                        content = $6,
                        updated_at = NOW()
                    WHERE id = $1 AND user_id = $2
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(owner)
                .bind(&snapshot.title)
                .bind(&snapshot.target_job)
                .bind(step)
                .bind(&content)
                .fetch_optional(&self.pool)
                .await?;

                match row {
                    Some(row) => row,
                    None => return Err(self.missing_or_forbidden(owner, id).await),
                }
            }
        };

        row_to_snapshot(row)
    }

    async fn delete_by_id(&self, owner: Uuid, id: DraftId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM resume_drafts WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_forbidden(owner, id).await);
        }
        info!("Deleted draft {id} for user {owner}");
        Ok(())
    }

    async fn list_for_owner(&self, owner: Uuid) -> Result<Vec<DraftSummary>, StoreError> {
        let rows: Vec<DraftSummaryRow> = sqlx::query_as(
            r#"
            SELECT id, title, target_job, current_step_id, updated_at
            FROM resume_drafts
            WHERE user_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DraftSummary {
                id: DraftId(row.id),
                current_step_id: parse_step(row.id, row.current_step_id.as_deref()),
                title: row.title,
                target_job: row.target_job,
                updated_at: row.updated_at,
            })
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-process
// ────────────────────────────────────────────────────────────────────────────

struct StoredDraft {
    owner: Uuid,
    snapshot: DraftSnapshot,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryDraftStore {
    drafts: RwLock<HashMap<DraftId, StoredDraft>>,
}

impl InMemoryDraftStore {
    fn check_owner(stored: &StoredDraft, owner: Uuid, id: DraftId) -> Result<(), StoreError> {
        if stored.owner == owner {
            Ok(())
        } else {
            Err(StoreError::Forbidden(id))
        }
    }
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn fetch_by_id(&self, owner: Uuid, id: DraftId) -> Result<DraftSnapshot, StoreError> {
        let drafts = self.drafts.read().await;
        let stored = drafts.get(&id).ok_or(StoreError::NotFound(id))?;
        Self::check_owner(stored, owner, id)?;
        Ok(stored.snapshot.clone())
    }

    async fn save(
        &self,
        owner: Uuid,
        snapshot: &DraftSnapshot,
    ) -> Result<DraftSnapshot, StoreError> {
        let mut drafts = self.drafts.write().await;
        let id = match snapshot.id {
            Some(id) => {
                let stored = drafts.get(&id).ok_or(StoreError::NotFound(id))?;
                Self::check_owner(stored, owner, id)?;
                id
            }
            None => DraftId::new_v4(),
        };

        let saved = DraftSnapshot {
            id: Some(id),
            ..snapshot.clone()
        };
        drafts.insert(
            id,
            StoredDraft {
                owner,
                snapshot: saved.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(saved)
    }

    async fn delete_by_id(&self, owner: Uuid, id: DraftId) -> Result<(), StoreError> {
        let mut drafts = self.drafts.write().await;
        let stored = drafts.get(&id).ok_or(StoreError::NotFound(id))?;
        Self::check_owner(stored, owner, id)?;
        drafts.remove(&id);
        Ok(())
    }

    async fn list_for_owner(&self, owner: Uuid) -> Result<Vec<DraftSummary>, StoreError> {
        let drafts = self.drafts.read().await;
        let mut summaries: Vec<DraftSummary> = drafts
            .iter()
            .filter(|(_, stored)| stored.owner == owner)
            .map(|(id, stored)| DraftSummary {
                id: *id,
                title: stored.snapshot.title.clone(),
                target_job: stored.snapshot.target_job.clone(),
                current_step_id: stored.snapshot.current_step_id,
                updated_at: stored.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
