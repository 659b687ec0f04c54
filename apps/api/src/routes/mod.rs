pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::state::AppState;
use crate::wizard::handlers;

pub fn build_router(state: AppState) -> Router {
    let root = state.config.wizard_root.trim_end_matches('/').to_string();

    Router::new()
        .route("/health", get(health::health_handler))
        // Wizard (step navigation + draft lifecycle)
        .route(&root, get(handlers::handle_wizard_root))
        .route(
            &format!("{root}/:draft"),
            get(handlers::handle_open_draft).patch(handlers::handle_update_snapshot),
        )
        .route(
            &format!("{root}/:draft/:step"),
            get(handlers::handle_open_step),
        )
        .route(
            &format!("{root}/:draft/:step/next"),
            post(handlers::handle_advance),
        )
        .route(
            &format!("{root}/:draft/:step/back"),
            post(handlers::handle_retreat),
        )
        // Draft API (dashboard)
        .route("/api/v1/drafts", get(handlers::handle_list_drafts))
        .route("/api/v1/drafts/:id", delete(handlers::handle_delete_draft))
        .route(
            "/api/v1/drafts/:id/backup",
            delete(handlers::handle_discard_backup),
        )
        .with_state(state)
}
