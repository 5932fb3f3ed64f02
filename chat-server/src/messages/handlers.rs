use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use shared_types::{MessageSnapshot, SubmitMessage};
use sqlx::SqlitePool;
use tracing::{error, info};

use super::store;
use crate::api::error::ApiError;
use crate::chatroom;
use crate::middleware::CurrentUser;
use crate::AppState;

/// Longest accepted message, in characters.
pub const MAX_CONTENT_CHARS: usize = 8_000;

/// POST /chatroom/{id}/message
///
/// Stores the message as `pending`, hands it to the launcher and answers
/// `202 Accepted` straight away. The reply shows up on later reads.
pub async fn submit_message(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(chatroom_id): Path<i64>,
    Json(body): Json<SubmitMessage>,
) -> Result<(StatusCode, Json<MessageSnapshot>), ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }
    if body.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    if chatroom::get_owned(&state.db, chatroom_id, user.id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound("Chatroom not found"));
    }

    let message = state
        .messages
        .create_pending(user.id, chatroom_id, &body.content)
        .await?;

    if let Err(e) = state.launcher.launch(message.id) {
        error!(message_id = message.id, "could not schedule message: {e}");
        // Nothing will ever pick this row up; settle it instead of leaving it pending.
        settle_unscheduled(&state.db, message.id).await;
        return Err(e.into());
    }

    info!(
        message_id = message.id,
        chatroom_id,
        user_id = user.id,
        "message accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(message)))
}

/// Mark a message that never reached the dispatch queue `failed`. Faults are
/// logged only, so the caller still sees the scheduling error.
async fn settle_unscheduled(pool: &SqlitePool, message_id: i64) -> bool {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            error!(message_id, "could not mark unscheduled message failed: {e}");
            return false;
        }
    };
    match store::fail(&mut conn, message_id).await {
        Ok(written) => written,
        Err(e) => {
            error!(message_id, "could not mark unscheduled message failed: {e}");
            false
        }
    }
}

/// GET /chatroom/{id}/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(chatroom_id): Path<i64>,
) -> Result<Json<Vec<MessageSnapshot>>, ApiError> {
    if chatroom::get_owned(&state.db, chatroom_id, user.id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound("Chatroom not found"));
    }
    Ok(Json(state.messages.list_for_chatroom(chatroom_id).await?))
}

/// GET /messages/{id}
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(message_id): Path<i64>,
) -> Result<Json<MessageSnapshot>, ApiError> {
    state
        .messages
        .get(message_id)
        .await?
        .filter(|m| m.user_id == user.id)
        .map(Json)
        .ok_or(ApiError::NotFound("Message not found"))
}
