// 内存存储
// 适合开发与测试，所有状态都在一把互斥锁内，因此每个方法天然是原子的

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::database::models::{
    AdminLevel, ForeignGroupParams, Group, GroupAdmin, MembershipState, RemoteUserParams, User,
};
use crate::database::store::{GroupStore, OwnerKind, STALE_CLAIM_AFTER, StoreError};

#[derive(Debug, Clone)]
struct UsernameClaim {
    owner: OwnerKind,
    owner_id: Option<i64>,
    claimed_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    next_group_id: i64,
    next_user_id: i64,
    claims: HashMap<String, UsernameClaim>,
    groups: BTreeMap<i64, Group>,
    users: BTreeMap<i64, User>,
    memberships: HashMap<(i64, i64), MembershipState>,
    admins: HashMap<(i64, i64), AdminLevel>,
}

impl MemoryState {
    fn group_mut(&mut self, group_id: i64) -> Result<&mut Group, StoreError> {
        self.groups.get_mut(&group_id).ok_or(StoreError::NotFound)
    }

    /// 检查用户名能否绑定到 `owner`：没有占用，或者是同类型的未绑定占用
    fn check_bindable(&self, username: &str, owner: OwnerKind) -> Result<(), StoreError> {
        match self.claims.get(&username.to_ascii_lowercase()) {
            Some(claim) if claim.owner_id.is_some() || claim.owner != owner => {
                Err(StoreError::Conflict)
            }
            _ if self.username_taken(username) => Err(StoreError::Conflict),
            _ => Ok(()),
        }
    }

    fn bind_claim(&mut self, username: &str, owner: OwnerKind, owner_id: i64) {
        self.claims.insert(
            username.to_ascii_lowercase(),
            UsernameClaim {
                owner,
                owner_id: Some(owner_id),
                claimed_at: Instant::now(),
            },
        );
    }

    fn username_taken(&self, username: &str) -> bool {
        let lower = username.to_ascii_lowercase();
        self.groups
            .values()
            .any(|g| g.username.to_ascii_lowercase() == lower)
            || self
                .users
                .values()
                .any(|u| u.username.to_ascii_lowercase() == lower)
    }
}

/// 内存实现的 GroupStore
pub struct MemoryGroupStore {
    state: Mutex<MemoryState>,
    stale_claim_after: Duration,
}

impl Default for MemoryGroupStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            stale_claim_after: STALE_CLAIM_AFTER,
        }
    }

    /// 未绑定的占用超过这个时间后可以被其他申请接管
    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = after;
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn claim_username(&self, handle: &str, owner: OwnerKind) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let key = handle.to_ascii_lowercase();
        if let Some(claim) = state.claims.get(&key) {
            let stale =
                claim.owner_id.is_none() && claim.claimed_at.elapsed() >= self.stale_claim_after;
            if !stale {
                return Ok(false);
            }
            tracing::warn!("Taking over stale username claim {}", key);
        }
        state.claims.insert(
            key,
            UsernameClaim {
                owner,
                owner_id: None,
                claimed_at: Instant::now(),
            },
        );
        Ok(true)
    }

    async fn release_username(&self, handle: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let key = handle.to_ascii_lowercase();
        // 已绑定的占用不能释放
        if state.claims.get(&key).is_some_and(|c| c.owner_id.is_none()) {
            state.claims.remove(&key);
        }
        Ok(())
    }

    async fn create_group(
        &self,
        username: &str,
        name: &str,
        creator_id: i64,
    ) -> Result<Group, StoreError> {
        let mut state = self.state()?;
        state.check_bindable(username, OwnerKind::Group)?;
        state.next_group_id += 1;
        let group = Group {
            id: state.next_group_id,
            username: username.to_string(),
            name: name.to_string(),
            about: None,
            member_count: 1,
            is_foreign: false,
            ap_id: None,
            inbox: None,
            created_at: Utc::now(),
        };
        state.groups.insert(group.id, group.clone());
        state.bind_claim(username, OwnerKind::Group, group.id);
        state
            .memberships
            .insert((group.id, creator_id), MembershipState::Member);
        state.admins.insert((group.id, creator_id), AdminLevel::Owner);
        Ok(group)
    }

    async fn insert_foreign_group(
        &self,
        params: &ForeignGroupParams,
    ) -> Result<Group, StoreError> {
        let mut state = self.state()?;
        if state.username_taken(&params.username) {
            return Err(StoreError::Conflict);
        }
        state.next_group_id += 1;
        let group = Group {
            id: state.next_group_id,
            username: params.username.clone(),
            name: params.name.clone(),
            about: params.about.clone(),
            member_count: 0,
            is_foreign: true,
            ap_id: Some(params.ap_id.clone()),
            inbox: Some(params.inbox.clone()),
            created_at: Utc::now(),
        };
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn group_by_id(&self, group_id: i64) -> Result<Option<Group>, StoreError> {
        Ok(self.state()?.groups.get(&group_id).cloned())
    }

    async fn update_group_info(
        &self,
        group_id: i64,
        name: &str,
        about: Option<&str>,
    ) -> Result<Group, StoreError> {
        let mut state = self.state()?;
        let group = state.group_mut(group_id)?;
        group.name = name.to_string();
        group.about = about.map(str::to_string);
        Ok(group.clone())
    }

    async fn create_local_user(
        &self,
        username: &str,
        nickname: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let mut state = self.state()?;
        state.check_bindable(username, OwnerKind::User)?;
        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: username.to_string(),
            nickname: nickname.to_string(),
            password_hash: Some(password_hash.to_string()),
            is_foreign: false,
            ap_id: None,
            inbox: None,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        state.bind_claim(username, OwnerKind::User, user.id);
        Ok(user)
    }

    async fn insert_remote_user(&self, params: &RemoteUserParams) -> Result<User, StoreError> {
        let mut state = self.state()?;
        if state.username_taken(&params.username) {
            return Err(StoreError::Conflict);
        }
        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: params.username.clone(),
            nickname: params.nickname.clone(),
            password_hash: None,
            is_foreign: true,
            ap_id: Some(params.ap_id.clone()),
            inbox: Some(params.inbox.clone()),
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.state()?.users.get(&user_id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let lower = username.to_ascii_lowercase();
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.username.to_ascii_lowercase() == lower)
            .cloned())
    }

    async fn membership_state(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<MembershipState, StoreError> {
        Ok(self
            .state()?
            .memberships
            .get(&(group_id, user_id))
            .copied()
            .unwrap_or_default())
    }

    async fn insert_membership(
        &self,
        group_id: i64,
        user_id: i64,
        membership: MembershipState,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.memberships.contains_key(&(group_id, user_id)) {
            return Err(StoreError::Conflict);
        }
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        state.group_mut(group_id)?.member_count += 1;
        state.memberships.insert((group_id, user_id), membership);
        Ok(())
    }

    async fn accept_membership(&self, group_id: i64, user_id: i64) -> Result<(), StoreError> {
        let mut state = self.state()?;
        match state.memberships.get_mut(&(group_id, user_id)) {
            Some(current) if *current == MembershipState::TentativeMember => {
                *current = MembershipState::Member;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_membership(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<MembershipState, StoreError> {
        let mut state = self.state()?;
        if !state.groups.contains_key(&group_id) {
            return Err(StoreError::NotFound);
        }
        let previous = state
            .memberships
            .remove(&(group_id, user_id))
            .ok_or(StoreError::NotFound)?;
        let group = state.group_mut(group_id)?;
        group.member_count = (group.member_count - 1).max(0);
        Ok(previous)
    }

    async fn admin_level(&self, group_id: i64, user_id: i64) -> Result<AdminLevel, StoreError> {
        Ok(self
            .state()?
            .admins
            .get(&(group_id, user_id))
            .copied()
            .unwrap_or_default())
    }

    async fn set_admin_level(
        &self,
        group_id: i64,
        user_id: i64,
        level: AdminLevel,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if level == AdminLevel::None {
            state.admins.remove(&(group_id, user_id));
        } else {
            state.admins.insert((group_id, user_id), level);
        }
        Ok(())
    }

    async fn admins(&self, group_id: i64) -> Result<Vec<GroupAdmin>, StoreError> {
        let state = self.state()?;
        let mut admins: Vec<GroupAdmin> = state
            .admins
            .iter()
            .filter(|((g, _), _)| *g == group_id)
            .map(|((_, user_id), level)| GroupAdmin {
                user_id: *user_id,
                level: *level,
            })
            .collect();
        admins.sort_by(|a, b| b.level.cmp(&a.level).then(a.user_id.cmp(&b.user_id)));
        Ok(admins)
    }

    async fn members(
        &self,
        group_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<User>, StoreError> {
        let state = self.state()?;
        let mut ids: Vec<i64> = state
            .memberships
            .iter()
            .filter(|((g, _), s)| *g == group_id && **s == MembershipState::Member)
            .map(|((_, user_id), _)| *user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .filter_map(|id| state.users.get(&id).cloned())
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn user_groups(&self, user_id: i64) -> Result<Vec<Group>, StoreError> {
        let state = self.state()?;
        Ok(state
            .groups
            .values()
            .filter(|g| {
                state.memberships.get(&(g.id, user_id)) == Some(&MembershipState::Member)
            })
            .cloned()
            .collect())
    }

    async fn remote_member_inboxes(&self, group_id: i64) -> Result<Vec<String>, StoreError> {
        let state = self.state()?;
        let mut seen = HashSet::new();
        let mut inboxes = Vec::new();
        let mut member_ids: Vec<i64> = state
            .memberships
            .keys()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, user_id)| *user_id)
            .collect();
        member_ids.sort_unstable();
        for user_id in member_ids {
            let Some(user) = state.users.get(&user_id) else {
                continue;
            };
            if let (true, Some(inbox)) = (user.is_foreign, user.inbox.as_ref()) {
                if seen.insert(inbox.clone()) {
                    inboxes.push(inbox.clone());
                }
            }
        }
        Ok(inboxes)
    }
}
