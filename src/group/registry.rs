// 群组注册表
// 纯数据访问，不涉及任何联邦协议

use std::sync::Arc;

use crate::database::models::{ForeignGroupParams, GroupAdmin, RemoteUserParams};
use crate::database::{AdminLevel, Group, GroupStore, MembershipState, User};
use crate::error::GroupError;

use super::username::handle_conflict;

#[derive(Clone)]
pub struct GroupRegistry {
    store: Arc<dyn GroupStore>,
}

impl GroupRegistry {
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GroupStore> {
        &self.store
    }

    /// 查找群组，不存在时返回 NotFound
    pub async fn get(&self, group_id: i64) -> Result<Group, GroupError> {
        self.store
            .group_by_id(group_id)
            .await?
            .ok_or(GroupError::NotFound)
    }

    pub async fn create_group(
        &self,
        username: &str,
        name: &str,
        creator_id: i64,
    ) -> Result<Group, GroupError> {
        self.store
            .create_group(username, name, creator_id)
            .await
            .map_err(handle_conflict)
    }

    pub async fn update_info(
        &self,
        group_id: i64,
        name: &str,
        about: Option<&str>,
    ) -> Result<Group, GroupError> {
        Ok(self.store.update_group_info(group_id, name, about).await?)
    }

    /// 由入站联邦流量发现的远程群组
    pub async fn register_foreign_group(
        &self,
        params: &ForeignGroupParams,
    ) -> Result<Group, GroupError> {
        Ok(self.store.insert_foreign_group(params).await?)
    }

    /// 远程账号镜像，与群组共用注册入口
    pub async fn register_remote_user(&self, params: &RemoteUserParams) -> Result<User, GroupError> {
        Ok(self.store.insert_remote_user(params).await?)
    }

    pub async fn membership_state(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<MembershipState, GroupError> {
        Ok(self.store.membership_state(group_id, user_id).await?)
    }

    pub async fn admin_level(&self, group_id: i64, user_id: i64) -> Result<AdminLevel, GroupError> {
        Ok(self.store.admin_level(group_id, user_id).await?)
    }

    pub async fn admins(&self, group_id: i64) -> Result<Vec<GroupAdmin>, GroupError> {
        Ok(self.store.admins(group_id).await?)
    }

    pub async fn members(
        &self,
        group_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<User>, GroupError> {
        Ok(self.store.members(group_id, offset, limit).await?)
    }

    pub async fn user_groups(&self, user_id: i64) -> Result<Vec<Group>, GroupError> {
        Ok(self.store.user_groups(user_id).await?)
    }
}
