//! Draft Session Controller — owns one draft under edit and the wizard step
//! it is displayed at.
//!
//! Three sources of truth meet here: the URL (which step), the in-memory
//! snapshot (what the user typed), and the Draft Store (what is persisted),
//! with the recovery backup covering the gap between saves.
//!
//! Mutable state sits behind a `tokio::sync::Mutex` that is never held across
//! I/O: neither the remote save nor a backup write. Field edits keep flowing
//! while a save is in flight. Every step submission merges and commits the
//! payload under the lock first; the save only ever sees the committed
//! snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::wizard::notices::{Notice, Notifier};
use crate::wizard::recovery::RecoveryBackups;
use crate::wizard::snapshot::{DraftId, DraftPatch, DraftSnapshot, ValidationError};
use crate::wizard::steps::{DraftRef, Step, StepRegistry, WizardPaths};
use crate::wizard::store::{DraftStore, StoreError};

#[derive(Debug, Error)]
pub enum WizardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Draft has not finished loading")]
    NotLoaded,

    #[error("No wizard step is active")]
    StepUnresolved,

    #[error("Already at the last step")]
    NavigationExhausted,

    #[error("A save is already in progress")]
    SaveInProgress,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where the client should go next. `Replace` must not add a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "location", rename_all = "snake_case")]
pub enum Navigation {
    Replace(String),
    Push(String),
    Dashboard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResolution {
    Active(usize),
    Redirect(String),
    /// Nothing can be decided until the draft finishes loading.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A new draft; nothing to fetch.
    Fresh,
    Loaded { restored_from_backup: bool },
    /// Transient failure, already reported. The wizard stays put.
    Unavailable,
    /// The draft cannot be opened by this user; leave the wizard.
    Leave(Navigation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotStarted,
    Loading,
    Loaded,
    Failed,
}

/// Collaborators shared by every session of a process.
#[derive(Clone)]
pub struct WizardContext {
    pub registry: StepRegistry,
    pub paths: WizardPaths,
    pub store: Arc<dyn DraftStore>,
    pub backups: RecoveryBackups,
}

/// Everything a step form needs to render.
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub draft: String,
    pub snapshot: DraftSnapshot,
    pub active_index: Option<usize>,
    pub active_step: Option<Step>,
    pub steps: &'static [Step],
    pub is_saving: bool,
    pub load_state: LoadState,
    pub previous_url: Option<String>,
    pub next_step: Option<Step>,
}

struct SessionState {
    draft: DraftRef,
    snapshot: DraftSnapshot,
    active_index: Option<usize>,
    load: LoadState,
    resolved_once: bool,
    /// Bumped on every change that is mirrored to the backup.
    revision: u64,
}

pub struct DraftSession {
    owner: Uuid,
    ctx: WizardContext,
    notifier: Arc<dyn Notifier>,
    saving: AtomicBool,
    state: Mutex<SessionState>,
    /// Highest revision written to the backup. Serializes backup writes so a
    /// slow older write never lands after a newer one.
    backup_written: Mutex<u64>,
}

/// Holds the busy flag for the lifetime of one save, including when the
/// surrounding future is dropped mid-await.
struct SavingGuard<'a>(&'a AtomicBool);

impl<'a> SavingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SavingGuard(flag))
    }
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DraftSession {
    pub fn new(
        ctx: WizardContext,
        owner: Uuid,
        draft: DraftRef,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let load = match draft {
            DraftRef::New => LoadState::Loaded,
            DraftRef::Existing(_) => LoadState::NotStarted,
        };
        Self {
            owner,
            ctx,
            notifier,
            saving: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                draft,
                snapshot: DraftSnapshot {
                    id: draft.id(),
                    ..Default::default()
                },
                active_index: None,
                load,
                resolved_once: false,
                revision: 0,
            }),
            backup_written: Mutex::new(0),
        }
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub async fn draft_ref(&self) -> DraftRef {
        self.state.lock().await.draft
    }

    pub async fn load_state(&self) -> LoadState {
        self.state.lock().await.load
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Maps the trailing URL segment onto a step.
    ///
    /// A recognized segment always wins. Otherwise a new draft is sent to the
    /// first step, and an existing draft is sent to its saved step on the
    /// first resolution, or to the first step after that. Existing drafts are
    /// never redirected before they have loaded: the saved-step hint is part
    /// of the loaded snapshot, and redirecting early would discard it.
    pub async fn resolve_step_from_url(
        &self,
        segments: &[&str],
        draft: DraftRef,
    ) -> StepResolution {
        let registry = &self.ctx.registry;
        let mut state = self.state.lock().await;

        let trailing = segments.last().copied().unwrap_or_default();
        if let Some(index) = registry.index_for_url_segment(trailing) {
            state.active_index = Some(index);
            state.resolved_once = true;
            return StepResolution::Active(index);
        }

        let first = registry.first();
        match draft {
            DraftRef::New => StepResolution::Redirect(self.ctx.paths.step_url(draft, &first)),
            DraftRef::Existing(id) => {
                if state.load != LoadState::Loaded {
                    debug!("Draft {id} not loaded yet; deferring step resolution");
                    return StepResolution::Pending;
                }

                let first_attempt = !state.resolved_once;
                state.resolved_once = true;

                let hinted = state
                    .snapshot
                    .current_step_id
                    .and_then(|step| registry.index_for_id(step));
                match hinted {
                    Some(index) if first_attempt => {
                        let step = registry.step_at(index);
                        debug!("Resuming draft {id} at saved step '{}'", step.url_segment);
                        StepResolution::Redirect(self.ctx.paths.step_url(draft, &step))
                    }
                    _ => StepResolution::Redirect(self.ctx.paths.step_url(draft, &first)),
                }
            }
        }
    }

    /// Fetches the remote draft and lays any recovery backup over it, field by
    /// field. A new draft keeps its empty snapshot.
    pub async fn load_draft(&self) -> LoadOutcome {
        let id = match begin_load(&mut *self.state.lock().await) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        self.fetch_and_reconcile(id).await
    }

    /// Loads the draft unless it is loaded or loading already. The check and
    /// the move to `Loading` happen under one lock, so concurrent callers
    /// start at most one load.
    pub async fn ensure_loaded(&self) -> Option<LoadOutcome> {
        let id = {
            let mut state = self.state.lock().await;
            if !matches!(state.load, LoadState::NotStarted | LoadState::Failed) {
                return None;
            }
            match begin_load(&mut state) {
                Ok(id) => id,
                Err(outcome) => return Some(outcome),
            }
        };
        Some(self.fetch_and_reconcile(id).await)
    }

    async fn fetch_and_reconcile(&self, id: DraftId) -> LoadOutcome {
        let (fetched, backup) = tokio::join!(
            self.ctx.store.fetch_by_id(self.owner, id),
            self.ctx.backups.read(id)
        );

        let mut state = self.state.lock().await;
        match fetched {
            Ok(mut snapshot) => {
                let restored_from_backup = backup.is_some();
                if let Some(record) = backup {
                    record.apply_to(&mut snapshot);
                    info!("Restored unsaved edits for draft {id} from recovery backup");
                    self.notifier
                        .notify(Notice::info("Unsaved changes were restored."));
                }
                snapshot.id = Some(id);
                state.snapshot = snapshot;
                state.load = LoadState::Loaded;
                LoadOutcome::Loaded {
                    restored_from_backup,
                }
            }
            Err(e) if e.is_fatal() => {
                warn!("Draft {id} cannot be opened by user {}: {e}", self.owner);
                state.load = LoadState::Failed;
                self.notifier
                    .notify(Notice::error("This résumé could not be found."));
                LoadOutcome::Leave(Navigation::Dashboard(self.ctx.paths.dashboard.clone()))
            }
            Err(e) => {
                warn!("Loading draft {id} failed: {e}");
                state.load = LoadState::Failed;
                self.notifier.notify(Notice::error(format!(
                    "Your résumé could not be loaded: {e}"
                )));
                LoadOutcome::Unavailable
            }
        }
    }

    /// Merges `patch` into the snapshot without saving remotely, then mirrors
    /// the whole snapshot into the recovery backup. Drafts without a remote id
    /// have no backup slot yet.
    pub async fn update_snapshot(&self, patch: DraftPatch) -> Result<DraftSnapshot, WizardError> {
        patch.validate()?;

        let (snapshot, staged) = {
            let mut state = self.state.lock().await;
            ensure_editable(&state)?;
            patch.apply_to(&mut state.snapshot);
            let staged = stage_backup(&mut state);
            (state.snapshot.clone(), staged)
        };
        if let Some((id, revision)) = staged {
            self.mirror_backup(id, revision, &snapshot).await;
        }
        Ok(snapshot)
    }

    /// Submits the active step: merge, commit, save, then move forward.
    ///
    /// The merged snapshot is committed (and backed up) before the save is
    /// issued and is kept even if the save fails.
    ///
    /// On the last step the payload is committed and backed up but not saved
    /// remotely; the caller gets `NavigationExhausted` and hands off to the
    /// finalize screen.
    pub async fn advance_step(&self, payload: DraftPatch) -> Result<Navigation, WizardError> {
        payload.validate()?;
        let _saving = SavingGuard::acquire(&self.saving).ok_or(WizardError::SaveInProgress)?;
        let registry = &self.ctx.registry;

        let (committed, staged, next_index) = {
            let mut state = self.state.lock().await;
            ensure_editable(&state)?;
            let current = state.active_index.ok_or(WizardError::StepUnresolved)?;

            payload.apply_to(&mut state.snapshot);
            let staged = stage_backup(&mut state);
            (state.snapshot.clone(), staged, current + 1)
        };
        if let Some((id, revision)) = staged {
            self.mirror_backup(id, revision, &committed).await;
        }
        if next_index >= registry.len() {
            return Err(WizardError::NavigationExhausted);
        }

        let mut to_save = committed;
        to_save.current_step_id = Some(registry.step_at(next_index).id);

        let saved = match self.ctx.store.save(self.owner, &to_save).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Saving draft {:?} failed: {e}", to_save.id);
                self.notifier.notify(Notice::error(format!(
                    "Your changes could not be saved: {e}"
                )));
                return Err(WizardError::Store(e));
            }
        };

        let mut state = self.state.lock().await;
        let id = match state.snapshot.id.or(saved.id) {
            Some(id) => id,
            None => {
                let e = StoreError::Unavailable("save returned no draft id".to_string());
                self.notifier.notify(Notice::error(format!(
                    "Your changes could not be saved: {e}"
                )));
                return Err(WizardError::Store(e));
            }
        };
        if state.snapshot.id.is_none() {
            info!("Draft created with id {id} for user {}", self.owner);
            state.snapshot.id = Some(id);
            state.draft = DraftRef::Existing(id);
        }

        let next = registry.step_at(next_index);
        state.snapshot.current_step_id = Some(next.id);
        state.active_index = Some(next_index);
        let staged = stage_backup(&mut state);
        let snapshot = state.snapshot.clone();
        drop(state);

        if let Some((id, revision)) = staged {
            self.mirror_backup(id, revision, &snapshot).await;
        }
        Ok(Navigation::Replace(
            self.ctx.paths.step_url(DraftRef::Existing(id), &next),
        ))
    }

    /// Writes `snapshot` to the backup unless a newer revision already went
    /// out. Must be called without the state lock held.
    async fn mirror_backup(&self, id: DraftId, revision: u64, snapshot: &DraftSnapshot) {
        let mut written = self.backup_written.lock().await;
        if *written >= revision {
            debug!("Skipping stale backup revision {revision} for draft {id}");
            return;
        }
        self.ctx.backups.write(id, snapshot).await;
        *written = revision;
    }

    /// Steps back without merging or saving anything. From the first step
    /// (or before any step resolved) this leaves the wizard.
    pub async fn retreat_step(&self) -> Navigation {
        let mut state = self.state.lock().await;
        match state.active_index {
            Some(current) if current > 0 => {
                let previous = self.ctx.registry.step_at(current - 1);
                state.active_index = Some(current - 1);
                Navigation::Push(self.ctx.paths.step_url(state.draft, &previous))
            }
            _ => Navigation::Dashboard(self.ctx.paths.dashboard.clone()),
        }
    }

    /// Removes the recovery backup for this draft. Returns `false` for a
    /// draft that has never been saved and so has no backup.
    pub async fn discard_backup(&self) -> bool {
        let id = self.state.lock().await.snapshot.id;
        match id {
            Some(id) => {
                self.ctx.backups.clear(id).await;
                info!("Discarded recovery backup for draft {id}");
                true
            }
            None => false,
        }
    }

    pub async fn view(&self) -> StepView {
        let registry = &self.ctx.registry;
        let state = self.state.lock().await;

        let active_step = state.active_index.map(|i| registry.step_at(i));
        let previous_url = state
            .active_index
            .filter(|i| *i > 0)
            .map(|i| self.ctx.paths.step_url(state.draft, &registry.step_at(i - 1)));
        let next_step = state
            .active_index
            .map(|i| i + 1)
            .filter(|i| *i < registry.len())
            .map(|i| registry.step_at(i));

        StepView {
            draft: state.draft.to_string(),
            snapshot: state.snapshot.clone(),
            active_index: state.active_index,
            active_step,
            steps: registry.steps(),
            is_saving: self.is_saving(),
            load_state: state.load,
            previous_url,
            next_step,
        }
    }
}

/// Moves an existing draft to `Loading`; a new draft is loaded at once.
fn begin_load(state: &mut SessionState) -> Result<DraftId, LoadOutcome> {
    match state.draft {
        DraftRef::New => {
            state.load = LoadState::Loaded;
            Err(LoadOutcome::Fresh)
        }
        DraftRef::Existing(id) => {
            state.load = LoadState::Loading;
            Ok(id)
        }
    }
}

/// Claims the next backup revision for the committed snapshot. Drafts
/// without a remote id have no backup slot yet.
fn stage_backup(state: &mut SessionState) -> Option<(DraftId, u64)> {
    let id = state.snapshot.id?;
    state.revision += 1;
    Some((id, state.revision))
}

fn ensure_editable(state: &SessionState) -> Result<(), WizardError> {
    if state.load == LoadState::Loaded {
        Ok(())
    } else {
        Err(WizardError::NotLoaded)
    }
}
