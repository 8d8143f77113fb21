use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::{AppState, error::GroupError, utils::verify_token};

/// 校验 Bearer 令牌，并把 [`Claims`](crate::utils::Claims) 放入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, GroupError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(GroupError::Unauthorized)?;

    let claims = verify_token(token.trim(), &state.config).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        GroupError::Unauthorized
    })?;
    if claims.user_id().is_none() {
        return Err(GroupError::Unauthorized);
    }

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
