use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::wizard::notices::NoticeBuffer;
use crate::wizard::session::{DraftSession, WizardContext};
use crate::wizard::steps::DraftRef;

/// A controller instance plus the notices it has raised but not yet
/// delivered.
#[derive(Clone)]
pub struct LiveSession {
    pub session: Arc<DraftSession>,
    pub notices: Arc<NoticeBuffer>,
}

/// Bounds on how many controllers stay in memory and for how long.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// A session untouched for this long is dropped on the next sweep.
    pub idle_ttl: Duration,
    /// Past this many sessions the least recently used one is dropped.
    pub capacity: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(30 * 60),
            capacity: 10_000,
        }
    }
}

struct Slot {
    live: LiveSession,
    last_seen: Instant,
}

/// Live wizard sessions, keyed by the client's wizard-session id.
///
/// One browser tab keeps one session id for as long as it stays in the
/// wizard, so the controller (and its first-resolution bookkeeping) survives
/// across requests. Abandoned tabs are swept out after `idle_ttl`; a session
/// whose save is still in flight is never evicted.
#[derive(Clone)]
pub struct SessionRegistry {
    ctx: WizardContext,
    limits: SessionLimits,
    sessions: Arc<Mutex<HashMap<Uuid, Slot>>>,
}

impl SessionRegistry {
    pub fn new(ctx: WizardContext, limits: SessionLimits) -> Self {
        Self {
            ctx,
            limits,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn context(&self) -> &WizardContext {
        &self.ctx
    }

    /// Returns the session for `session_id` if it serves `draft` for `owner`,
    /// otherwise starts a fresh one in its place.
    ///
    /// A session started on `new` keeps serving its draft after the first save
    /// assigns an id, but a request for `new` always starts over.
    pub async fn open(&self, session_id: Uuid, owner: Uuid, draft: DraftRef) -> LiveSession {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions, now);

        if let Some(slot) = sessions.get_mut(&session_id) {
            let live = &slot.live;
            if live.session.owner() == owner && live.session.draft_ref().await == draft {
                slot.last_seen = now;
                return slot.live.clone();
            }
            debug!("Wizard session {session_id} switched to draft {draft}; starting over");
        } else if sessions.len() >= self.limits.capacity {
            evict_least_recent(&mut sessions);
        }

        let notices = Arc::new(NoticeBuffer::default());
        let live = LiveSession {
            session: Arc::new(DraftSession::new(
                self.ctx.clone(),
                owner,
                draft,
                notices.clone(),
            )),
            notices,
        };
        sessions.insert(
            session_id,
            Slot {
                live: live.clone(),
                last_seen: now,
            },
        );
        live
    }

    /// Drops one wizard session, e.g. once its draft turned out to be
    /// unreachable for its owner.
    pub async fn close(&self, session_id: Uuid) {
        self.sessions.lock().await.remove(&session_id);
    }

    /// Drops every session of `owner` bound to `draft`, e.g. after the draft
    /// is deleted.
    pub async fn forget_draft(&self, owner: Uuid, draft: DraftRef) {
        let mut sessions = self.sessions.lock().await;
        let mut stale = Vec::new();
        for (id, slot) in sessions.iter() {
            let session = &slot.live.session;
            if session.owner() == owner && session.draft_ref().await == draft {
                stale.push(*id);
            }
        }
        for id in stale {
            sessions.remove(&id);
        }
    }

    fn evict_idle(&self, sessions: &mut HashMap<Uuid, Slot>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, slot| {
            slot.live.session.is_saving() || now.duration_since(slot.last_seen) < self.limits.idle_ttl
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("Evicted {evicted} idle wizard sessions");
        }
    }
}

fn evict_least_recent(sessions: &mut HashMap<Uuid, Slot>) {
    let oldest = sessions
        .iter()
        .filter(|(_, slot)| !slot.live.session.is_saving())
        .min_by_key(|(_, slot)| slot.last_seen)
        .map(|(id, _)| *id);
    if let Some(id) = oldest {
        debug!("Session capacity reached; evicting wizard session {id}");
        sessions.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::recovery::{MemoryRecoveryCache, RecoveryBackups};
    use crate::wizard::steps::{StepRegistry, WizardPaths};
    use crate::wizard::store::InMemoryDraftStore;
    use crate::wizard::snapshot::{DraftId, DraftPatch};

    impl SessionRegistry {
        async fn len(&self) -> usize {
            self.sessions.lock().await.len()
        }
    }

    fn registry() -> SessionRegistry {
        registry_with(SessionLimits::default())
    }

    fn registry_with(limits: SessionLimits) -> SessionRegistry {
        SessionRegistry::new(
            WizardContext {
                registry: StepRegistry::default(),
                paths: WizardPaths::default(),
                store: Arc::new(InMemoryDraftStore::default()),
                backups: RecoveryBackups::new(Arc::new(MemoryRecoveryCache::default())),
            },
            limits,
        )
    }

    #[tokio::test]
    async fn test_same_session_and_draft_reuses_controller() {
        let registry = registry();
        let (sid, owner) = (Uuid::new_v4(), Uuid::new_v4());

        let a = registry.open(sid, owner, DraftRef::New).await;
        let b = registry.open(sid, owner, DraftRef::New).await;
        assert!(Arc::ptr_eq(&a.session, &b.session));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_switching_draft_or_owner_replaces_controller() {
        let registry = registry();
        let (sid, owner) = (Uuid::new_v4(), Uuid::new_v4());

        let a = registry.open(sid, owner, DraftRef::New).await;
        let b = registry
            .open(sid, owner, DraftRef::Existing(DraftId::new_v4()))
            .await;
        assert!(!Arc::ptr_eq(&a.session, &b.session));

        let c = registry.open(sid, Uuid::new_v4(), b.session.draft_ref().await).await;
        assert!(!Arc::ptr_eq(&b.session, &c.session));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_new_session_follows_its_draft_after_first_save() {
        let registry = registry();
        let (sid, owner) = (Uuid::new_v4(), Uuid::new_v4());

        let live = registry.open(sid, owner, DraftRef::New).await;
        live.session
            .resolve_step_from_url(&["target-job"], DraftRef::New)
            .await;
        live.session
            .advance_step(DraftPatch {
                title: Some("CV".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let draft = live.session.draft_ref().await;
        assert!(matches!(draft, DraftRef::Existing(_)));

        let again = registry.open(sid, owner, draft).await;
        assert!(Arc::ptr_eq(&live.session, &again.session));
        assert_eq!(again.session.active_index().await, Some(1));
    }

    #[tokio::test]
    async fn test_forget_draft_drops_bound_sessions() {
        let registry = registry();
        let owner = Uuid::new_v4();
        let draft = DraftRef::Existing(DraftId::new_v4());
        registry.open(Uuid::new_v4(), owner, draft).await;
        registry.open(Uuid::new_v4(), owner, draft).await;
        registry.open(Uuid::new_v4(), owner, DraftRef::New).await;

        registry.forget_draft(owner, draft).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_are_evicted_after_ttl() {
        let limits = SessionLimits {
            idle_ttl: Duration::from_secs(60),
            capacity: 100,
        };
        let registry = registry_with(limits);
        let owner = Uuid::new_v4();
        let (stale, kept) = (Uuid::new_v4(), Uuid::new_v4());

        let first = registry.open(stale, owner, DraftRef::New).await;
        registry.open(kept, owner, DraftRef::New).await;

        tokio::time::advance(Duration::from_secs(40)).await;
        registry.open(kept, owner, DraftRef::New).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        // `stale` is 70s idle, `kept` only 30s.
        registry.open(Uuid::new_v4(), owner, DraftRef::New).await;
        assert_eq!(registry.len().await, 2);

        let reopened = registry.open(stale, owner, DraftRef::New).await;
        assert!(!Arc::ptr_eq(&first.session, &reopened.session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let registry = registry_with(SessionLimits {
            idle_ttl: Duration::from_secs(3600),
            capacity: 2,
        });
        let owner = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let first_a = registry.open(a, owner, DraftRef::New).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let first_b = registry.open(b, owner, DraftRef::New).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        registry.open(a, owner, DraftRef::New).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        registry.open(c, owner, DraftRef::New).await;
        assert_eq!(registry.len().await, 2);
        assert!(Arc::ptr_eq(
            &first_a.session,
            &registry.open(a, owner, DraftRef::New).await.session
        ));
        // `b` was least recently used; asking for it again starts over.
        assert!(!Arc::ptr_eq(
            &first_b.session,
            &registry.open(b, owner, DraftRef::New).await.session
        ));
    }

    #[tokio::test]
    async fn test_many_one_shot_sessions_stay_bounded() {
        let registry = registry_with(SessionLimits {
            idle_ttl: Duration::from_secs(3600),
            capacity: 50,
        });
        let owner = Uuid::new_v4();
        for _ in 0..1_000 {
            registry.open(Uuid::new_v4(), owner, DraftRef::New).await;
        }
        assert_eq!(registry.len().await, 50);
    }

    #[tokio::test]
    async fn test_close_drops_the_session() {
        let registry = registry();
        let sid = Uuid::new_v4();
        registry.open(sid, Uuid::new_v4(), DraftRef::New).await;
        registry.close(sid).await;
        assert_eq!(registry.len().await, 0);
    }
}
