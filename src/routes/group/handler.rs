use axum::{
    extract::{Extension, Json, Path, Query, State},
    response::IntoResponse,
};

use crate::{
    AppState,
    error::GroupError,
    utils::{Claims, success_to_api_response},
};

use super::super::current_user;
use super::model::{
    CreateGroupRequest, EditGroupRequest, JoinGroupResponse, MembersQuery, SetAdminLevelRequest,
};

#[axum::debug_handler]
pub async fn create_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, GroupError> {
    let user_id = current_user(&claims)?;
    let group = state
        .groups
        .create_group(user_id, &req.username, &req.name)
        .await?;
    Ok(success_to_api_response(group))
}

#[axum::debug_handler]
pub async fn my_groups(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GroupError> {
    let groups = state.groups.user_groups(current_user(&claims)?).await?;
    Ok(success_to_api_response(groups))
}

#[axum::debug_handler]
pub async fn get_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, GroupError> {
    let profile = state
        .groups
        .profile(group_id, Some(current_user(&claims)?))
        .await?;
    Ok(success_to_api_response(profile))
}

#[axum::debug_handler]
pub async fn get_members(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Query(query): Query<MembersQuery>,
) -> Result<impl IntoResponse, GroupError> {
    let page = state.groups.members(group_id, query.offset).await?;
    Ok(success_to_api_response(page))
}

#[axum::debug_handler]
pub async fn join_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, GroupError> {
    let membership_state = state
        .groups
        .join(group_id, current_user(&claims)?)
        .await?;
    Ok(success_to_api_response(JoinGroupResponse { membership_state }))
}

#[axum::debug_handler]
pub async fn leave_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, GroupError> {
    state
        .groups
        .leave(group_id, current_user(&claims)?)
        .await?;
    Ok(success_to_api_response(()))
}

#[axum::debug_handler]
pub async fn edit_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(req): Json<EditGroupRequest>,
) -> Result<impl IntoResponse, GroupError> {
    let group = state
        .groups
        .edit_general(
            group_id,
            current_user(&claims)?,
            &req.name,
            req.about.as_deref(),
        )
        .await?;
    Ok(success_to_api_response(group))
}

#[axum::debug_handler]
pub async fn set_admin_level(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(req): Json<SetAdminLevelRequest>,
) -> Result<impl IntoResponse, GroupError> {
    state
        .groups
        .set_admin_level(group_id, current_user(&claims)?, req.user_id, req.level)
        .await?;
    Ok(success_to_api_response(()))
}
