use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::auth::TokenIssuer;
use crate::cache::ListingCache;
use crate::launcher::TaskLauncher;
use crate::messages::store::MessageStore;

pub struct AppState {
    pub db: SqlitePool,
    pub messages: MessageStore,
    pub tokens: TokenIssuer,
    pub otp_ttl: Duration,
    pub cache: Arc<dyn ListingCache>,
    pub cache_ttl: Duration,
    pub launcher: TaskLauncher,
}
