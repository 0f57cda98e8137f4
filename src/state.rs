use std::sync::Arc;

use crate::config::Config;
use crate::services::sessions::SessionManager;
use crate::store::Store;

/// The application's state.
pub struct AppState<S> {
    /// The attendance store.
    pub store: Arc<S>,
    /// Creates and expires sessions.
    pub sessions: SessionManager,
    /// The application's configuration.
    pub config: Arc<Config>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            sessions: self.sessions,
            config: self.config.clone(),
        }
    }
}

impl<S: Store> AppState<S> {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `store` - The attendance store.
    /// * `config` - The application's configuration.
    pub fn new(store: S, config: Config) -> Self {
        let sessions = SessionManager::new(config.session_validity());
        tracing::info!(
            "✅ Session manager initialized ({}s validity)",
            config.session_validity_secs
        );

        Self {
            store: Arc::new(store),
            sessions,
            config: Arc::new(config),
        }
    }
}
