// 权限检查
// 每次特权操作都重新查询，不做缓存

use crate::database::{AdminLevel, Group};
use crate::error::GroupError;

use super::registry::GroupRegistry;

#[derive(Clone)]
pub struct AuthorizationGate {
    registry: GroupRegistry,
}

impl AuthorizationGate {
    pub fn new(registry: GroupRegistry) -> Self {
        Self { registry }
    }

    /// 要求 actor 在群组中的级别至少为 `min_level`
    pub async fn require_level(
        &self,
        group_id: i64,
        actor: i64,
        min_level: AdminLevel,
    ) -> Result<Group, GroupError> {
        let group = self.registry.get(group_id).await?;
        let level = self.registry.admin_level(group_id, actor).await?;
        if !level.is_at_least(min_level) {
            tracing::debug!(
                "User {} has {:?} in group {}, {:?} required",
                actor,
                level,
                group_id,
                min_level
            );
            return Err(GroupError::NotAllowed);
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{GroupStore, MemoryGroupStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn distinguishes_missing_group_from_missing_rights() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = store.create_group("hikers", "Hikers", 1).await.unwrap();
        let gate = AuthorizationGate::new(GroupRegistry::new(store.clone()));

        assert!(matches!(
            gate.require_level(999, 1, AdminLevel::Admin).await,
            Err(GroupError::NotFound)
        ));
        assert!(matches!(
            gate.require_level(group.id, 2, AdminLevel::Moderator).await,
            Err(GroupError::NotAllowed)
        ));
        assert_eq!(
            gate.require_level(group.id, 1, AdminLevel::Admin)
                .await
                .unwrap()
                .id,
            group.id
        );
    }

    #[tokio::test]
    async fn checks_are_not_cached() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = store.create_group("sailors", "Sailors", 1).await.unwrap();
        let gate = AuthorizationGate::new(GroupRegistry::new(store.clone()));

        store
            .set_admin_level(group.id, 2, AdminLevel::Admin)
            .await
            .unwrap();
        assert!(gate.require_level(group.id, 2, AdminLevel::Admin).await.is_ok());

        store
            .set_admin_level(group.id, 2, AdminLevel::None)
            .await
            .unwrap();
        assert!(matches!(
            gate.require_level(group.id, 2, AdminLevel::Admin).await,
            Err(GroupError::NotAllowed)
        ));
    }
}
