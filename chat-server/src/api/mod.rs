//! HTTP routes.
//!
//! Public: health and the OTP login flow. Everything else sits behind
//! [`require_auth`](crate::middleware::require_auth).

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::{auth, chatroom, messages, middleware, AppState};

pub mod error;

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/auth/change-password", post(auth::handlers::change_password))
        .route("/user/me", get(auth::handlers::me))
        .route(
            "/chatroom",
            get(chatroom::handlers::list_chatrooms).post(chatroom::handlers::create_chatroom),
        )
        .route("/chatroom/{id}", get(chatroom::handlers::get_chatroom))
        .route(
            "/chatroom/{id}/message",
            post(messages::handlers::submit_message),
        )
        .route(
            "/chatroom/{id}/messages",
            get(messages::handlers::list_messages),
        )
        .route("/messages/{id}", get(messages::handlers::get_message))
        .route_layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(auth::handlers::signup))
        .route("/auth/send-otp", post(auth::handlers::send_otp))
        .route("/auth/forgot-password", post(auth::handlers::forgot_password))
        .route("/auth/verify-otp", post(auth::handlers::verify_otp))
        .merge(protected)
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
