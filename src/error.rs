use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::database::StoreError;
use crate::utils::{error_codes, error_to_api_response};

/// 群组核心操作的错误，全部同步返回给调用方
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group not found")]
    NotFound,
    #[error("action not allowed")]
    NotAllowed,
    #[error("already a member of this group")]
    AlreadyMember,
    #[error("not a member of this group")]
    NotMember,
    #[error("username is already taken")]
    UsernameConflict,
    #[error("invalid username")]
    InvalidHandle,
    #[error("username is reserved")]
    ReservedHandle,
    #[error("group name is too short")]
    NameTooShort,
    #[error("group admins must step down before leaving")]
    AdminCannotLeave,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("password must be between 6 and 72 characters")]
    InvalidPassword,
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GroupError {
    fn status_and_code(&self) -> (StatusCode, i32, &'static str) {
        match self {
            GroupError::NotFound => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND, "群组不存在"),
            GroupError::NotAllowed => (
                StatusCode::FORBIDDEN,
                error_codes::PERMISSION_DENIED,
                "没有权限执行该操作",
            ),
            GroupError::AlreadyMember => (
                StatusCode::CONFLICT,
                error_codes::ALREADY_MEMBER,
                "已经是群组成员",
            ),
            GroupError::NotMember => (
                StatusCode::BAD_REQUEST,
                error_codes::NOT_MEMBER,
                "不是群组成员",
            ),
            GroupError::UsernameConflict => (
                StatusCode::CONFLICT,
                error_codes::USERNAME_TAKEN,
                "用户名已被占用",
            ),
            GroupError::InvalidHandle => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                "用户名格式无效，只允许字母开头的字母、数字、下划线、点和连字符",
            ),
            GroupError::ReservedHandle => (
                StatusCode::BAD_REQUEST,
                error_codes::RESERVED_USERNAME,
                "该用户名为系统保留",
            ),
            GroupError::NameTooShort => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                "群组名称太短",
            ),
            GroupError::AdminCannotLeave => (
                StatusCode::CONFLICT,
                error_codes::ADMIN_CANNOT_LEAVE,
                "管理员需要先卸任才能退出群组",
            ),
            GroupError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "用户名或密码错误",
            ),
            GroupError::InvalidPassword => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                "密码长度必须在6到72个字符之间",
            ),
            GroupError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "未授权访问",
            ),
            GroupError::Store(_) | GroupError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "内部服务器错误",
            ),
        }
    }
}

impl IntoResponse for GroupError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.status_and_code();
        match &self {
            GroupError::Store(err) => tracing::error!("store failure: {}", err),
            GroupError::Internal(msg) => tracing::error!("internal failure: {}", msg),
            _ => {}
        }
        (status, error_to_api_response::<()>(code, message.to_string())).into_response()
    }
}
