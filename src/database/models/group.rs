// 群组实体
// 定义群组、成员状态与管理级别

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 群组实体，本地群组与远程镜像共用同一结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: i64,
    /// 全站唯一的用户名（远程群组为 name@domain）
    pub username: String,
    pub name: String,
    pub about: Option<String>,
    pub member_count: i64,
    /// 权威记录是否在远程服务器上
    pub is_foreign: bool,
    /// 远程群组的 actor URI
    pub ap_id: Option<String>,
    /// 远程群组的收件箱
    pub inbox: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 远程群组镜像的注册参数
#[derive(Debug, Clone)]
pub struct ForeignGroupParams {
    pub username: String,
    pub name: String,
    pub about: Option<String>,
    pub ap_id: String,
    pub inbox: String,
}

/// 群组管理级别，按 NONE < MODERATOR < ADMIN < OWNER 排序
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminLevel {
    #[default]
    None,
    Moderator,
    Admin,
    Owner,
}

impl AdminLevel {
    pub fn is_at_least(self, required: AdminLevel) -> bool {
        self >= required
    }

    pub fn as_i16(self) -> i16 {
        match self {
            AdminLevel::None => 0,
            AdminLevel::Moderator => 1,
            AdminLevel::Admin => 2,
            AdminLevel::Owner => 3,
        }
    }

    /// 未知的数据库取值按 NONE 处理
    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => AdminLevel::Moderator,
            2 => AdminLevel::Admin,
            3 => AdminLevel::Owner,
            _ => AdminLevel::None,
        }
    }
}

/// 用户与群组之间的成员关系状态，NONE 等价于没有记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipState {
    #[default]
    None,
    /// 只存在于远程群组，等待远程确认
    TentativeMember,
    Member,
}

impl MembershipState {
    pub fn is_member_or_tentative(self) -> bool {
        matches!(
            self,
            MembershipState::Member | MembershipState::TentativeMember
        )
    }

    pub fn as_i16(self) -> i16 {
        match self {
            MembershipState::None => 0,
            MembershipState::TentativeMember => 1,
            MembershipState::Member => 2,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => MembershipState::TentativeMember,
            2 => MembershipState::Member,
            _ => MembershipState::None,
        }
    }
}

/// 群组管理员列表中的一项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupAdmin {
    pub user_id: i64,
    pub level: AdminLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_levels_compare_as_at_least() {
        assert!(AdminLevel::Owner.is_at_least(AdminLevel::Admin));
        assert!(AdminLevel::Admin.is_at_least(AdminLevel::Admin));
        assert!(!AdminLevel::Moderator.is_at_least(AdminLevel::Admin));
        assert!(AdminLevel::None.is_at_least(AdminLevel::None));
    }

    #[test]
    fn unknown_stored_values_fall_back_to_none() {
        assert_eq!(AdminLevel::from_i16(42), AdminLevel::None);
        assert_eq!(MembershipState::from_i16(-1), MembershipState::None);
        assert_eq!(
            MembershipState::from_i16(MembershipState::TentativeMember.as_i16()),
            MembershipState::TentativeMember
        );
    }

    #[test]
    fn levels_serialize_in_screaming_case() {
        let json = serde_json::to_string(&AdminLevel::Moderator).unwrap();
        assert_eq!(json, "\"MODERATOR\"");
        let state: MembershipState = serde_json::from_str("\"TENTATIVE_MEMBER\"").unwrap();
        assert_eq!(state, MembershipState::TentativeMember);
    }
}
