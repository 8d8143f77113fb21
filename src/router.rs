use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    routes,
};

/// 组装所有路由；`rate_limiter` 为 None 时不限流（测试中使用）
pub fn build_router(state: AppState, rate_limiter: Option<Arc<RateLimiter>>) -> Router {
    let public_routes = Router::new()
        .route("/users/register", post(routes::user::register))
        .route("/users/login", post(routes::user::login));

    let protected_routes = Router::new()
        .route("/users/me", get(routes::user::me))
        .route("/groups/my", get(routes::group::my_groups))
        .route("/groups/create", post(routes::group::create_group))
        .route("/groups/{id}", get(routes::group::get_group))
        .route("/groups/{id}/members", get(routes::group::get_members))
        .route("/groups/{id}/join", post(routes::group::join_group))
        .route("/groups/{id}/leave", post(routes::group::leave_group))
        .route("/groups/{id}/edit", post(routes::group::edit_group))
        .route("/groups/{id}/admins", post(routes::group::set_admin_level))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let router = Router::new().nest(
        &state.config.api_base_uri,
        Router::new().merge(public_routes).merge(protected_routes),
    );

    let router = router.layer(axum::middleware::from_fn(log_errors));
    let router = match rate_limiter {
        Some(limiter) => router.layer(axum::middleware::from_fn_with_state(limiter, rate_limit)),
        None => router,
    };

    // 开发模式允许所有来源
    #[cfg(debug_assertions)]
    let router = router.layer(tower_http::cors::CorsLayer::permissive());

    router.with_state(state)
}
