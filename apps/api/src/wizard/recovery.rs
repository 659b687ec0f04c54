//! Local Recovery Cache — crash-recovery copies of in-progress drafts.
//!
//! The cache itself is a plain string key/value slot (`RecoveryCache`), the
//! server-side stand-in for a browser's local storage. `RecoveryBackups`
//! owns the key scheme and the JSON format on top of it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::wizard::snapshot::{DraftId, DraftPatch, DraftSnapshot};
use crate::wizard::steps::StepId;

const BACKUP_KEY_PREFIX: &str = "resume-draft-backup";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait RecoveryCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

/// Entries are written without expiry; they live until explicitly removed.
///
/// One multiplexed connection is opened at startup and shared by every
/// request; clones are handles onto the same socket.
pub struct RedisRecoveryCache {
    conn: MultiplexedConnection,
}

impl RedisRecoveryCache {
    pub async fn connect(client: &redis::Client) -> Result<Self, CacheError> {
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Redis recovery cache connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl RecoveryCache for RedisRecoveryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-process
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRecoveryCache {
    entries: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl RecoveryCache for MemoryRecoveryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// A cache whose every call fails, as an unreachable Redis would.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FailingCache;

#[cfg(test)]
#[async_trait]
impl RecoveryCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(unreachable_redis())
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), CacheError> {
        Err(unreachable_redis())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(unreachable_redis())
    }
}

#[cfg(test)]
fn unreachable_redis() -> CacheError {
    CacheError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

// ────────────────────────────────────────────────────────────────────────────
// Backups
// ────────────────────────────────────────────────────────────────────────────

/// Stored form of a backup: the draft content plus the step hint the
/// controller last recorded. Older or partial records carry only some
/// fields; the rest stay `None` and leave the remote value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    #[serde(flatten)]
    pub content: DraftPatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<StepId>,
}

impl BackupRecord {
    pub fn apply_to(self, snapshot: &mut DraftSnapshot) {
        self.content.apply_to(snapshot);
        if let Some(step) = self.current_step_id {
            snapshot.current_step_id = Some(step);
        }
    }
}

impl From<&DraftSnapshot> for BackupRecord {
    fn from(snapshot: &DraftSnapshot) -> Self {
        BackupRecord {
            content: DraftPatch::from(snapshot),
            current_step_id: snapshot.current_step_id,
        }
    }
}

/// Per-draft backups over a `RecoveryCache`.
///
/// Backups are best-effort: read failures and corrupt entries read as "no
/// backup", write failures are logged and swallowed. Nothing here can fail a
/// load or a save.
#[derive(Clone)]
pub struct RecoveryBackups {
    cache: Arc<dyn RecoveryCache>,
}

impl RecoveryBackups {
    pub fn new(cache: Arc<dyn RecoveryCache>) -> Self {
        Self { cache }
    }

    pub fn key_for(id: DraftId) -> String {
        format!("{BACKUP_KEY_PREFIX}:{id}")
    }

    pub async fn read(&self, id: DraftId) -> Option<BackupRecord> {
        let raw = match self.cache.get(&Self::key_for(id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Recovery cache read failed for draft {id}: {e}");
                return None;
            }
        };

        match serde_json::from_str::<BackupRecord>(&raw) {
            Ok(patch) => Some(patch),
            Err(e) => {
                warn!("Ignoring corrupt recovery backup for draft {id}: {e}");
                None
            }
        }
    }

    /// Overwrites the backup with the complete snapshot.
    pub async fn write(&self, id: DraftId, snapshot: &DraftSnapshot) {
        let payload = match serde_json::to_string(&BackupRecord::from(snapshot)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize recovery backup for draft {id}: {e}");
                return;
            }
        };

        match self.cache.set(&Self::key_for(id), payload).await {
            Ok(()) => debug!("Mirrored draft {id} to recovery backup"),
            Err(e) => warn!("Recovery cache write failed for draft {id}: {e}"),
        }
    }

    pub async fn clear(&self, id: DraftId) {
        if let Err(e) = self.cache.remove(&Self::key_for(id)).await {
            warn!("Recovery cache delete failed for draft {id}: {e}");
        }
    }
}
