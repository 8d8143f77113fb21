// 成员状态机
// 同一 (群组, 用户) 的所有转换在一把锁内完成“检查 - 写入 - 入队”，
// 因此前置条件检查没有竞态，出站活动的入队顺序与提交顺序一致。

use std::sync::Arc;

use tracing::info;

use crate::database::{AdminLevel, Group, MembershipState, StoreError};
use crate::error::GroupError;
use crate::federation::FederationDispatcher;

use super::locks::KeyedLocks;
use super::registry::GroupRegistry;

pub struct MembershipStateMachine {
    registry: GroupRegistry,
    dispatcher: Arc<FederationDispatcher>,
    locks: KeyedLocks<(i64, i64)>,
}

impl MembershipStateMachine {
    pub fn new(registry: GroupRegistry, dispatcher: Arc<FederationDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
            locks: KeyedLocks::new(),
        }
    }

    /// 加入群组
    ///
    /// 本地群组直接成为 MEMBER；远程群组成为 TENTATIVE_MEMBER 等待远程确认，
    /// 除非 `bypass_confirmation`。远程群组在本地写入成功后发送一个 Follow。
    pub async fn join(
        &self,
        group: &Group,
        user_id: i64,
        bypass_confirmation: bool,
    ) -> Result<MembershipState, GroupError> {
        let _guard = self.locks.lock((group.id, user_id)).await;

        let current = self.registry.membership_state(group.id, user_id).await?;
        if current != MembershipState::None {
            return Err(GroupError::AlreadyMember);
        }

        let state = if group.is_foreign && !bypass_confirmation {
            MembershipState::TentativeMember
        } else {
            MembershipState::Member
        };
        self.registry
            .store()
            .insert_membership(group.id, user_id, state)
            .await
            .map_err(|e| match e {
                StoreError::Conflict => GroupError::AlreadyMember,
                StoreError::NotFound => GroupError::NotFound,
                other => GroupError::Store(other),
            })?;

        if group.is_foreign {
            self.dispatcher.send_follow(user_id, group);
        }
        info!("User {} joined group {} as {:?}", user_id, group.id, state);
        Ok(state)
    }

    /// 退出群组，远程群组在本地删除成功后发送 Undo Follow
    pub async fn leave(&self, group: &Group, user_id: i64) -> Result<(), GroupError> {
        let _guard = self.locks.lock((group.id, user_id)).await;

        let current = self.registry.membership_state(group.id, user_id).await?;
        if !current.is_member_or_tentative() {
            return Err(GroupError::NotMember);
        }
        // 管理员必须先卸任，保证“有级别即为成员”
        if self.registry.admin_level(group.id, user_id).await? > AdminLevel::None {
            return Err(GroupError::AdminCannotLeave);
        }

        self.registry
            .store()
            .delete_membership(group.id, user_id)
            .await
            .map_err(not_member)?;

        if group.is_foreign {
            self.dispatcher.send_unfollow(user_id, group);
        }
        info!("User {} left group {}", user_id, group.id);
        Ok(())
    }

    /// 远程群组接受了加入请求
    pub async fn confirm(&self, group: &Group, user_id: i64) -> Result<(), GroupError> {
        let _guard = self.locks.lock((group.id, user_id)).await;

        self.registry
            .store()
            .accept_membership(group.id, user_id)
            .await
            .map_err(not_member)?;
        info!("Membership of user {} in group {} confirmed", user_id, group.id);
        Ok(())
    }

    /// 远程群组拒绝了加入请求，不再发送任何活动
    pub async fn reject(&self, group: &Group, user_id: i64) -> Result<(), GroupError> {
        let _guard = self.locks.lock((group.id, user_id)).await;

        let current = self.registry.membership_state(group.id, user_id).await?;
        if current != MembershipState::TentativeMember {
            return Err(GroupError::NotMember);
        }
        self.registry
            .store()
            .delete_membership(group.id, user_id)
            .await
            .map_err(not_member)?;
        info!("Membership of user {} in group {} rejected", user_id, group.id);
        Ok(())
    }

    /// 修改管理级别
    ///
    /// actor 的级别必须严格高于目标级别；修改他人时还必须严格高于对方当前级别。
    /// 授予 NONE 以上的级别要求目标是 MEMBER。
    pub async fn set_admin_level(
        &self,
        group: &Group,
        actor: i64,
        target: i64,
        level: AdminLevel,
    ) -> Result<(), GroupError> {
        let _guard = self.locks.lock((group.id, target)).await;

        let actor_level = self.registry.admin_level(group.id, actor).await?;
        if !actor_level.is_at_least(AdminLevel::Moderator) || actor_level <= level {
            return Err(GroupError::NotAllowed);
        }
        if actor != target {
            let target_level = self.registry.admin_level(group.id, target).await?;
            if actor_level <= target_level {
                return Err(GroupError::NotAllowed);
            }
        }
        if level > AdminLevel::None
            && self.registry.membership_state(group.id, target).await? != MembershipState::Member
        {
            return Err(GroupError::NotMember);
        }

        self.registry
            .store()
            .set_admin_level(group.id, target, level)
            .await?;
        info!(
            "User {} set admin level of user {} in group {} to {:?}",
            actor, target, group.id, level
        );
        Ok(())
    }
}

fn not_member(err: StoreError) -> GroupError {
    match err {
        StoreError::NotFound => GroupError::NotMember,
        other => GroupError::Store(other),
    }
}
