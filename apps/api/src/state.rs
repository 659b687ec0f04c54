use std::sync::Arc;

use crate::config::Config;
use crate::wizard::registry::SessionRegistry;
use crate::wizard::store::DraftStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DraftStore>,
    /// Live wizard controllers; also carries the step registry, paths and backups.
    pub sessions: SessionRegistry,
    pub config: Config,
}
