use std::sync::Arc;

use crate::config::AppConfig;
use crate::hub::Hub;
use crate::presence::PresenceManager;
use crate::store::Store;
use crate::typing::TypingManager;

/// Process-wide shared state, built once in `main` and handed explicitly to
/// every Session and Handler. `db` is `Arc<dyn Store>` rather than a bare
/// `PgPool` so handler logic can be driven against an in-memory `MockStore`
/// in tests without a live database.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Store>,
    pub hub: Arc<Hub>,
    pub typing: Arc<TypingManager>,
    pub presence: Arc<PresenceManager>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(db: Arc<dyn Store>, config: AppConfig) -> Self {
        Self {
            db,
            hub: Hub::new(),
            typing: Arc::new(TypingManager::new()),
            presence: Arc::new(PresenceManager::new()),
            config,
        }
    }
}
