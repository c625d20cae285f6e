//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::genai::GenerationBackend;
use crate::session::SessionManager;
use crate::store::ConversationStore;
use crate::ws::ConnectionHub;

/// Shared handles for the whole actor; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: ConversationStore,
    pub hub: Arc<ConnectionHub>,
    pub sessions: Arc<SessionManager>,
    pub backend: Arc<dyn GenerationBackend>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: ConversationStore,
        hub: Arc<ConnectionHub>,
        sessions: Arc<SessionManager>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            config,
            store,
            hub,
            sessions,
            backend,
        }
    }
}
