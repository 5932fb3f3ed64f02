use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Extension, Json};
use shared_types::{
    OtpRequest, OtpResponse, OtpVerifyRequest, SignupRequest, TokenResponse, UserProfile,
};
use tracing::info;

use crate::api::error::ApiError;
use crate::auth::{generate_otp, normalize_phone, users, AuthError};
use crate::middleware::CurrentUser;
use crate::AppState;

fn phone_from(raw: &str) -> Result<String, ApiError> {
    normalize_phone(raw).ok_or_else(|| ApiError::BadRequest("invalid phone number".to_string()))
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let phone = phone_from(&body.phone)?;
    let user = users::create_user(&state.db, &phone).await?;
    info!(user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// POST /auth/send-otp
///
/// Delivery is mocked: the code comes back in the response body.
pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpRequest>,
) -> Result<Json<OtpResponse>, ApiError> {
    let phone = phone_from(&body.phone)?;
    issue_otp(&state, &phone, "OTP sent successfully").await
}

/// POST /auth/forgot-password
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpRequest>,
) -> Result<Json<OtpResponse>, ApiError> {
    let phone = phone_from(&body.phone)?;
    issue_otp(&state, &phone, "Password reset OTP sent successfully").await
}

async fn issue_otp(
    state: &AppState,
    phone: &str,
    message: &str,
) -> Result<Json<OtpResponse>, ApiError> {
    if users::find_by_phone(&state.db, phone).await?.is_none() {
        return Err(AuthError::UserNotFound.into());
    }

    let otp = generate_otp();
    users::store_otp(&state.db, phone, &otp, state.otp_ttl).await?;
    info!("OTP issued");
    Ok(Json(OtpResponse {
        otp,
        message: message.to_string(),
    }))
}

/// POST /auth/verify-otp
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpVerifyRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let phone = phone_from(&body.phone)?;
    if users::find_by_phone(&state.db, &phone).await?.is_none() {
        return Err(AuthError::UserNotFound.into());
    }
    if !users::consume_otp(&state.db, &phone, body.otp.trim()).await? {
        return Err(AuthError::InvalidOtp.into());
    }

    let token = state.tokens.issue(&phone)?;
    Ok(Json(TokenResponse::bearer(token)))
}

/// POST /auth/change-password
///
/// There are no passwords; this rotates the caller onto a fresh token.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state.tokens.issue(&user.phone)?;
    info!(user_id = user.id, "access token rotated");
    Ok(Json(TokenResponse::bearer(token)))
}

/// GET /user/me
pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<UserProfile> {
    Json(user.into())
}
