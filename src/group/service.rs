// 群组服务
// HTTP 层调用的入口：权限检查 -> 状态修改 -> 联邦通知

use std::sync::Arc;

use serde::Serialize;

use crate::database::models::{ForeignGroupParams, GroupAdmin, RemoteUserParams};
use crate::database::{AdminLevel, Group, GroupStore, MembershipState, User};
use crate::error::GroupError;
use crate::federation::FederationDispatcher;

use super::gate::AuthorizationGate;
use super::membership::MembershipStateMachine;
use super::registry::GroupRegistry;
use super::username::{UsernameAllocator, validate_handle};

/// 成员列表每页数量
pub const MEMBERS_PAGE_SIZE: i64 = 100;

/// 群组主页需要的数据
#[derive(Debug, Serialize)]
pub struct GroupProfile {
    pub group: Group,
    pub admins: Vec<GroupAdmin>,
    /// 仅在已登录时返回
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_state: Option<MembershipState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_level: Option<AdminLevel>,
}

#[derive(Debug, Serialize)]
pub struct MemberPage {
    pub members: Vec<User>,
    pub offset: i64,
    pub total: i64,
}

pub struct GroupService {
    registry: GroupRegistry,
    gate: AuthorizationGate,
    allocator: Arc<UsernameAllocator>,
    membership: MembershipStateMachine,
    dispatcher: Arc<FederationDispatcher>,
}

impl GroupService {
    pub fn new(
        store: Arc<dyn GroupStore>,
        allocator: Arc<UsernameAllocator>,
        dispatcher: Arc<FederationDispatcher>,
    ) -> Self {
        let registry = GroupRegistry::new(store);
        Self {
            gate: AuthorizationGate::new(registry.clone()),
            membership: MembershipStateMachine::new(registry.clone(), dispatcher.clone()),
            registry,
            allocator,
            dispatcher,
        }
    }

    /// 创建本地群组，创建者成为 OWNER
    pub async fn create_group(
        &self,
        creator_id: i64,
        username: &str,
        name: &str,
    ) -> Result<Group, GroupError> {
        validate_handle(username)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(GroupError::NameTooShort);
        }

        let registry = self.registry.clone();
        let group = self
            .allocator
            .allocate(username, move |handle| async move {
                registry.create_group(&handle, &name, creator_id).await
            })
            .await?;

        tracing::info!("User {} created group {} ({})", creator_id, group.id, group.username);
        Ok(group)
    }

    /// 修改群组名称与简介，需要 ADMIN
    pub async fn edit_general(
        &self,
        group_id: i64,
        actor: i64,
        name: &str,
        about: Option<&str>,
    ) -> Result<Group, GroupError> {
        self.gate
            .require_level(group_id, actor, AdminLevel::Admin)
            .await?;

        let name = name.trim();
        if name.is_empty() {
            return Err(GroupError::NameTooShort);
        }
        let about = about.map(str::trim).filter(|a| !a.is_empty());

        let group = self.registry.update_info(group_id, name, about).await?;
        self.dispatcher.send_group_update(&group);
        Ok(group)
    }

    pub async fn join(&self, group_id: i64, user_id: i64) -> Result<MembershipState, GroupError> {
        let group = self.registry.get(group_id).await?;
        self.membership.join(&group, user_id, false).await
    }

    pub async fn leave(&self, group_id: i64, user_id: i64) -> Result<(), GroupError> {
        let group = self.registry.get(group_id).await?;
        self.membership.leave(&group, user_id).await
    }

    /// 入站 Accept：确认待定成员
    pub async fn confirm_join(&self, group_id: i64, user_id: i64) -> Result<(), GroupError> {
        let group = self.registry.get(group_id).await?;
        self.membership.confirm(&group, user_id).await
    }

    /// 入站 Reject：撤回待定成员
    pub async fn reject_join(&self, group_id: i64, user_id: i64) -> Result<(), GroupError> {
        let group = self.registry.get(group_id).await?;
        self.membership.reject(&group, user_id).await
    }

    pub async fn set_admin_level(
        &self,
        group_id: i64,
        actor: i64,
        target: i64,
        level: AdminLevel,
    ) -> Result<(), GroupError> {
        let group = self
            .gate
            .require_level(group_id, actor, AdminLevel::Moderator)
            .await?;
        self.membership
            .set_admin_level(&group, actor, target, level)
            .await
    }

    pub async fn register_foreign_group(
        &self,
        params: &ForeignGroupParams,
    ) -> Result<Group, GroupError> {
        self.registry.register_foreign_group(params).await
    }

    pub async fn register_remote_user(
        &self,
        params: &RemoteUserParams,
    ) -> Result<User, GroupError> {
        self.registry.register_remote_user(params).await
    }

    pub async fn profile(
        &self,
        group_id: i64,
        viewer: Option<i64>,
    ) -> Result<GroupProfile, GroupError> {
        let group = self.registry.get(group_id).await?;
        let admins = self.registry.admins(group_id).await?;
        let (membership_state, admin_level) = match viewer {
            Some(user_id) => (
                Some(self.registry.membership_state(group_id, user_id).await?),
                Some(self.registry.admin_level(group_id, user_id).await?),
            ),
            None => (None, None),
        };
        Ok(GroupProfile {
            group,
            admins,
            membership_state,
            admin_level,
        })
    }

    pub async fn members(&self, group_id: i64, offset: i64) -> Result<MemberPage, GroupError> {
        let group = self.registry.get(group_id).await?;
        let offset = offset.max(0);
        let members = self
            .registry
            .members(group_id, offset, MEMBERS_PAGE_SIZE)
            .await?;
        Ok(MemberPage {
            members,
            offset,
            total: group.member_count,
        })
    }

    pub async fn user_groups(&self, user_id: i64) -> Result<Vec<Group>, GroupError> {
        self.registry.user_groups(user_id).await
    }
}
