use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use shared_types::ChatroomSummary;
use tracing::{debug, error, warn};

use crate::api::error::ApiError;
use crate::cache::user_chatrooms_key;
use crate::middleware::CurrentUser;
use crate::AppState;

/// POST /chatroom
pub async fn create_chatroom(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<(StatusCode, Json<ChatroomSummary>), ApiError> {
    let chatroom = super::create(&state.db, user.id).await?;

    // The cached listing for this user is now stale.
    if let Err(e) = state.cache.delete(&user_chatrooms_key(user.id)).await {
        error!(user_id = user.id, "chatroom listing invalidation failed: {e}");
    }

    debug!(user_id = user.id, chatroom_id = chatroom.id, "chatroom created");
    Ok((StatusCode::CREATED, Json(chatroom)))
}

/// GET /chatroom: the caller's chatrooms, served from cache when possible
pub async fn list_chatrooms(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<ChatroomSummary>>, ApiError> {
    let key = user_chatrooms_key(user.id);

    match state.cache.get(&key).await {
        Ok(Some(cached)) => match serde_json::from_str::<Vec<ChatroomSummary>>(&cached) {
            Ok(listing) => {
                debug!(user_id = user.id, "chatroom listing cache hit");
                return Ok(Json(listing));
            }
            Err(e) => warn!(user_id = user.id, "discarding undecodable cached listing: {e}"),
        },
        Ok(None) => {}
        Err(e) => warn!(user_id = user.id, "chatroom listing cache read failed: {e}"),
    }

    let listing = super::list_for_user(&state.db, user.id).await?;
    cache_listing(&state, user.id, &key, &listing).await;
    Ok(Json(listing))
}

/// Store `listing` under `key`, then drop it again if a chatroom was created
/// after the listing was read. A create always inserts before it invalidates,
/// so either the re-check sees the new room or the create's invalidation
/// lands after this write.
async fn cache_listing(
    state: &AppState,
    user_id: i64,
    key: &str,
    listing: &[ChatroomSummary],
) {
    let json = match serde_json::to_string(listing) {
        Ok(json) => json,
        Err(e) => {
            warn!(user_id, "chatroom listing not cacheable: {e}");
            return;
        }
    };
    if let Err(e) = state.cache.set(key, &json, state.cache_ttl).await {
        warn!(user_id, "chatroom listing cache write failed: {e}");
        return;
    }

    let cached_latest = listing.iter().map(|c| c.id).max();
    let still_current = matches!(
        super::latest_id_for_user(&state.db, user_id).await,
        Ok(latest) if latest == cached_latest
    );
    if !still_current {
        debug!(user_id, "chatroom listing changed while caching; dropping it");
        if let Err(e) = state.cache.delete(key).await {
            error!(user_id, "chatroom listing invalidation failed: {e}");
        }
    }
}

/// GET /chatroom/{id}
pub async fn get_chatroom(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(chatroom_id): Path<i64>,
) -> Result<Json<ChatroomSummary>, ApiError> {
    super::get_owned(&state.db, chatroom_id, user.id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Chatroom not found"))
}
