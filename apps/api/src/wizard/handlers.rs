use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;
use crate::wizard::notices::Notice;
use crate::wizard::registry::LiveSession;
use crate::wizard::session::{
    LoadOutcome, LoadState, Navigation, StepResolution, StepView, WizardError,
};
use crate::wizard::snapshot::{DraftId, DraftPatch};
use crate::wizard::steps::DraftRef;
use crate::wizard::store::DraftSummary;

pub const USER_HEADER: &str = "x-user-id";
pub const SESSION_HEADER: &str = "x-wizard-session";

/// The authenticated owner, taken from `x-user-id`.
pub struct Owner(pub Uuid);

/// Owner plus the wizard session (one per open wizard tab).
pub struct WizardIdentity {
    pub owner: Uuid,
    pub session_id: Uuid,
}

fn uuid_header(headers: &HeaderMap, name: &str) -> Option<Result<Uuid, AppError>> {
    headers.get(name).map(|value| {
        value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| AppError::Validation(format!("Header '{name}' must be a UUID")))
    })
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match uuid_header(&parts.headers, USER_HEADER) {
            Some(owner) => Ok(Owner(owner?)),
            None => Err(AppError::Unauthorized),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for WizardIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Owner(owner) = Owner::from_request_parts(parts, state).await?;
        let session_id = uuid_header(&parts.headers, SESSION_HEADER).unwrap_or_else(|| {
            Err(AppError::Validation(format!(
                "Header '{SESSION_HEADER}' is required"
            )))
        })?;
        Ok(WizardIdentity { owner, session_id })
    }
}

#[derive(Serialize)]
pub struct StepViewResponse {
    #[serde(flatten)]
    pub view: StepView,
    pub notices: Vec<Notice>,
}

#[derive(Serialize)]
pub struct NavigationResponse {
    pub navigation: Navigation,
    pub notices: Vec<Notice>,
}

#[derive(Serialize)]
pub struct PendingResponse {
    pub status: &'static str,
    pub notices: Vec<Notice>,
}

fn parse_draft(segment: &str) -> Result<DraftRef, AppError> {
    segment.parse().map_err(AppError::Validation)
}

async fn step_view(live: &LiveSession) -> Json<StepViewResponse> {
    Json(StepViewResponse {
        view: live.session.view().await,
        notices: live.notices.drain(),
    })
}

fn navigate(live: &LiveSession, navigation: Navigation) -> Json<NavigationResponse> {
    Json(NavigationResponse {
        navigation,
        notices: live.notices.drain(),
    })
}

/// Opens the session for the addressed draft and loads it if needed.
///
/// When the draft cannot be opened at all the session is closed and the
/// error carries the navigation out of the wizard plus the notices raised
/// on the way.
async fn open_session(
    state: &AppState,
    identity: &WizardIdentity,
    draft: DraftRef,
) -> Result<LiveSession, NavigationResponse> {
    let live = state
        .sessions
        .open(identity.session_id, identity.owner, draft)
        .await;
    match live.session.ensure_loaded().await {
        Some(LoadOutcome::Leave(navigation)) => {
            state.sessions.close(identity.session_id).await;
            Err(NavigationResponse {
                navigation,
                notices: live.notices.drain(),
            })
        }
        _ => Ok(live),
    }
}

fn redirect(navigation: Navigation) -> Response {
    match navigation {
        Navigation::Replace(url) | Navigation::Push(url) | Navigation::Dashboard(url) => {
            Redirect::temporary(&url).into_response()
        }
    }
}

/// GET /resume-builder
/// The bare wizard root always starts a new draft at the first step.
pub async fn handle_wizard_root(State(state): State<AppState>) -> Redirect {
    let ctx = state.sessions.context();
    Redirect::temporary(&ctx.paths.step_url(DraftRef::New, &ctx.registry.first()))
}

/// GET /resume-builder/:draft
pub async fn handle_open_draft(
    State(state): State<AppState>,
    identity: WizardIdentity,
    Path(draft): Path<String>,
) -> Result<Response, AppError> {
    open_at(&state, &identity, &draft, None).await
}

/// GET /resume-builder/:draft/:step
pub async fn handle_open_step(
    State(state): State<AppState>,
    identity: WizardIdentity,
    Path((draft, step)): Path<(String, String)>,
) -> Result<Response, AppError> {
    open_at(&state, &identity, &draft, Some(&step)).await
}

async fn open_at(
    state: &AppState,
    identity: &WizardIdentity,
    draft_segment: &str,
    step_segment: Option<&str>,
) -> Result<Response, AppError> {
    let draft = parse_draft(draft_segment)?;
    let live = match open_session(state, identity, draft).await {
        Ok(live) => live,
        Err(leave) => return Ok(redirect(leave.navigation)),
    };

    let mut segments = vec![draft_segment];
    segments.extend(step_segment);

    match live.session.resolve_step_from_url(&segments, draft).await {
        StepResolution::Active(_) => Ok(step_view(&live).await.into_response()),
        StepResolution::Redirect(url) => Ok(Redirect::temporary(&url).into_response()),
        StepResolution::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                status: "pending",
                notices: live.notices.drain(),
            }),
        )
            .into_response()),
    }
}

/// PATCH /resume-builder/:draft
/// Field-level edits between step submissions; never saved remotely.
pub async fn handle_update_snapshot(
    State(state): State<AppState>,
    identity: WizardIdentity,
    Path(draft): Path<String>,
    Json(patch): Json<DraftPatch>,
) -> Result<Json<StepViewResponse>, AppError> {
    let draft = parse_draft(&draft)?;
    let live = open_session(&state, &identity, draft)
        .await
        .map_err(|_| AppError::NotFound(format!("Draft {draft} not found")))?;

    if !patch.is_empty() {
        live.session.update_snapshot(patch).await?;
    }
    Ok(step_view(&live).await)
}

/// Resolves the step a submission was made from. A submission from a URL
/// that does not name a step yields the navigation the client should follow
/// instead.
async fn resolve_submission(
    live: &LiveSession,
    draft: DraftRef,
    draft_segment: &str,
    step_segment: &str,
) -> Result<Option<Navigation>, AppError> {
    match live
        .session
        .resolve_step_from_url(&[draft_segment, step_segment], draft)
        .await
    {
        StepResolution::Active(_) => Ok(None),
        StepResolution::Redirect(url) => Ok(Some(Navigation::Replace(url))),
        StepResolution::Pending => Err(WizardError::NotLoaded.into()),
    }
}

/// POST /resume-builder/:draft/:step/next
pub async fn handle_advance(
    State(state): State<AppState>,
    identity: WizardIdentity,
    Path((draft_segment, step_segment)): Path<(String, String)>,
    Json(payload): Json<DraftPatch>,
) -> Result<Json<NavigationResponse>, AppError> {
    let draft = parse_draft(&draft_segment)?;
    let live = match open_session(&state, &identity, draft).await {
        Ok(live) => live,
        Err(leave) => return Ok(Json(leave)),
    };
    if let Some(navigation) =
        resolve_submission(&live, draft, &draft_segment, &step_segment).await?
    {
        return Ok(navigate(&live, navigation));
    }

    match live.session.advance_step(payload).await {
        Ok(navigation) => Ok(navigate(&live, navigation)),
        Err(WizardError::NavigationExhausted) => {
            let draft = live.session.draft_ref().await;
            let finalize = state.sessions.context().paths.finalize_url(draft);
            Ok(navigate(&live, Navigation::Replace(finalize)))
        }
        Err(e) => {
            // The error response carries the failure; don't repeat it later.
            live.notices.drain();
            Err(e.into())
        }
    }
}

/// POST /resume-builder/:draft/:step/back
pub async fn handle_retreat(
    State(state): State<AppState>,
    identity: WizardIdentity,
    Path((draft_segment, step_segment)): Path<(String, String)>,
) -> Result<Json<NavigationResponse>, AppError> {
    let draft = parse_draft(&draft_segment)?;
    let live = match open_session(&state, &identity, draft).await {
        Ok(live) => live,
        Err(leave) => return Ok(Json(leave)),
    };
    if let Some(navigation) =
        resolve_submission(&live, draft, &draft_segment, &step_segment).await?
    {
        return Ok(navigate(&live, navigation));
    }

    let navigation = live.session.retreat_step().await;
    Ok(navigate(&live, navigation))
}

/// GET /api/v1/drafts
pub async fn handle_list_drafts(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<DraftSummary>>, AppError> {
    Ok(Json(state.store.list_for_owner(owner).await?))
}

/// DELETE /api/v1/drafts/:id
pub async fn handle_delete_draft(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<DraftId>,
) -> Result<StatusCode, AppError> {
    state.store.delete_by_id(owner, id).await?;
    state.sessions.context().backups.clear(id).await;
    state
        .sessions
        .forget_draft(owner, DraftRef::Existing(id))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/drafts/:id/backup
/// Explicitly discards unsaved local edits for a draft.
pub async fn handle_discard_backup(
    State(state): State<AppState>,
    identity: WizardIdentity,
    Path(id): Path<DraftId>,
) -> Result<StatusCode, AppError> {
    let live = open_session(&state, &identity, DraftRef::Existing(id))
        .await
        .map_err(|_| AppError::NotFound(format!("Draft {id} not found")))?;
    // Ownership is only established by a successful load.
    if live.session.load_state().await != LoadState::Loaded {
        live.notices.drain();
        return Err(AppError::Unavailable(format!("Draft {id} could not be loaded")));
    }
    live.session.discard_backup().await;
    live.notices.drain();
    Ok(StatusCode::NO_CONTENT)
}
