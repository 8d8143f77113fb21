use axum::{
    extract::{Extension, Json, State},
    response::IntoResponse,
};

use crate::{
    AppState,
    database::User,
    error::GroupError,
    utils::{Claims, generate_token, success_to_api_response},
};

use super::super::current_user;
use super::model::{AuthResponse, LoginRequest, RegisterRequest};

fn auth_response(user: User, state: &AppState) -> Result<AuthResponse, GroupError> {
    let (token, expires_at) = generate_token(user.id, &state.config)
        .map_err(|e| GroupError::Internal(format!("failed to sign token: {}", e)))?;
    Ok(AuthResponse {
        user_id: user.id,
        username: user.username,
        nickname: user.nickname,
        token,
        expires_at,
    })
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, GroupError> {
    let user = state
        .accounts
        .register(&req.username, req.nickname.as_deref(), &req.password)
        .await?;
    Ok(success_to_api_response(auth_response(user, &state)?))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, GroupError> {
    let user = state.accounts.login(&req.username, &req.password).await?;
    Ok(success_to_api_response(auth_response(user, &state)?))
}

#[axum::debug_handler]
pub async fn me(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GroupError> {
    let user = state.accounts.find(current_user(&claims)?).await?;
    Ok(success_to_api_response(user))
}
