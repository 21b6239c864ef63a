use std::sync::Arc;

use crate::backend::BackendProvider;
use crate::session::SessionSettings;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Backend every session talks to.
    pub provider: Arc<BackendProvider>,
    pub session: SessionSettings,
}

impl AppState {
    pub fn new(provider: BackendProvider, session: SessionSettings) -> Self {
        Self {
            provider: Arc::new(provider),
            session,
        }
    }
}
