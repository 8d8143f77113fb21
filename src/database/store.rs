// 存储抽象
// PostgreSQL 与内存实现都实现这个 trait，上层不依赖具体数据库

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{
    AdminLevel, ForeignGroupParams, Group, GroupAdmin, MembershipState, RemoteUserParams, User,
};

/// 存储层统一错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            // 引用的用户或群组不存在
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// 未绑定的用户名占用超过这个时间视为遗留，可以被接管
pub const STALE_CLAIM_AFTER: Duration = Duration::from_secs(600);

/// 用户名的持有者类型，用户与群组共享同一个命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    User,
    Group,
}

impl OwnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OwnerKind::User => "user",
            OwnerKind::Group => "group",
        }
    }
}

/// 持久化存储
///
/// 每个方法都是一个原子单元：成员状态的写入与 member_count 的增减
/// 必须在同一个事务（或同一把锁）内完成。
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// 占用一个用户名，已被占用时返回 false
    ///
    /// 超过 [`STALE_CLAIM_AFTER`] 仍未绑定的占用会被接管。
    async fn claim_username(&self, handle: &str, owner: OwnerKind) -> Result<bool, StoreError>;

    /// 释放尚未绑定的占用
    async fn release_username(&self, handle: &str) -> Result<(), StoreError>;

    /// 创建本地群组，同时写入创建者的成员记录与 OWNER 级别
    ///
    /// 用户名占用在同一个事务内绑定到新群组，已绑定给其他对象时返回 Conflict。
    async fn create_group(
        &self,
        username: &str,
        name: &str,
        creator_id: i64,
    ) -> Result<Group, StoreError>;

    async fn insert_foreign_group(&self, params: &ForeignGroupParams)
    -> Result<Group, StoreError>;

    async fn group_by_id(&self, group_id: i64) -> Result<Option<Group>, StoreError>;

    async fn update_group_info(
        &self,
        group_id: i64,
        name: &str,
        about: Option<&str>,
    ) -> Result<Group, StoreError>;

    /// 创建本地账号，与 `create_group` 一样在同一个事务内绑定用户名
    async fn create_local_user(
        &self,
        username: &str,
        nickname: &str,
        password_hash: &str,
    ) -> Result<User, StoreError>;

    async fn insert_remote_user(&self, params: &RemoteUserParams) -> Result<User, StoreError>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn membership_state(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<MembershipState, StoreError>;

    /// 写入成员记录并让 member_count 加一
    ///
    /// 记录已存在时返回 Conflict，用户或群组不存在时返回 NotFound。
    async fn insert_membership(
        &self,
        group_id: i64,
        user_id: i64,
        state: MembershipState,
    ) -> Result<(), StoreError>;

    /// TENTATIVE_MEMBER -> MEMBER，不存在待确认记录时返回 NotFound
    async fn accept_membership(&self, group_id: i64, user_id: i64) -> Result<(), StoreError>;

    /// 删除成员记录并让 member_count 减一，返回删除前的状态
    async fn delete_membership(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<MembershipState, StoreError>;

    async fn admin_level(&self, group_id: i64, user_id: i64) -> Result<AdminLevel, StoreError>;

    /// 设置管理级别，NONE 表示删除分配
    async fn set_admin_level(
        &self,
        group_id: i64,
        user_id: i64,
        level: AdminLevel,
    ) -> Result<(), StoreError>;

    /// 级别从高到低排列
    async fn admins(&self, group_id: i64) -> Result<Vec<GroupAdmin>, StoreError>;

    /// 按用户ID排序的成员分页，只包含 MEMBER
    async fn members(&self, group_id: i64, offset: i64, limit: i64)
    -> Result<Vec<User>, StoreError>;

    async fn user_groups(&self, user_id: i64) -> Result<Vec<Group>, StoreError>;

    /// 群组远程成员的收件箱（去重）
    async fn remote_member_inboxes(&self, group_id: i64) -> Result<Vec<String>, StoreError>;
}
