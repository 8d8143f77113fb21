pub mod group;
pub mod user;

use crate::{error::GroupError, utils::Claims};

/// 认证中间件已保证 sub 是数字，这里仍然不做假设
pub(crate) fn current_user(claims: &Claims) -> Result<i64, GroupError> {
    claims.user_id().ok_or(GroupError::Unauthorized)
}
