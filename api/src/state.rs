use std::sync::Arc;

use common::auth::SecretToken;
use common::db::DbPool;
use common::storage::StateStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub store: Arc<dyn StateStore>,
    pub api_token: SecretToken,
}

impl AppState {
    pub fn new(db_pool: DbPool, store: Arc<dyn StateStore>, api_token: SecretToken) -> Self {
        Self {
            db_pool,
            store,
            api_token,
        }
    }
}
