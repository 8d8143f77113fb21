// 用户名分配
// 用户与群组共享一个命名空间；同一个用户名并发申请时只有一个成功

use std::future::Future;
use std::sync::Arc;

use crate::database::{Group, GroupStore, OwnerKind, StoreError, User};
use crate::error::GroupError;

use super::locks::KeyedLocks;

const MIN_HANDLE_LEN: usize = 2;
const MAX_HANDLE_LEN: usize = 50;

/// 路由前缀与系统名称，不允许注册
const RESERVED_HANDLES: &[&str] = &[
    "account",
    "activitypub",
    "admin",
    "api",
    "favicon.ico",
    "feed",
    "groups",
    "inbox",
    "login",
    "logout",
    "my",
    "outbox",
    "posts",
    "register",
    "robots.txt",
    "settings",
    "static",
    "system",
    "users",
    "well-known",
];

/// 检查用户名格式：字母开头，其余为字母、数字、下划线、点或连字符
pub fn is_valid_handle(handle: &str) -> bool {
    let mut chars = handle.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (MIN_HANDLE_LEN..=MAX_HANDLE_LEN).contains(&handle.len())
        && first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

pub fn is_reserved_handle(handle: &str) -> bool {
    RESERVED_HANDLES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(handle))
}

/// 分配前由调用方执行的校验
pub fn validate_handle(handle: &str) -> Result<(), GroupError> {
    if !is_valid_handle(handle) {
        return Err(GroupError::InvalidHandle);
    }
    if is_reserved_handle(handle) {
        return Err(GroupError::ReservedHandle);
    }
    Ok(())
}

/// 回调内写入实体时的唯一约束冲突同样视为用户名冲突
pub fn handle_conflict(err: StoreError) -> GroupError {
    match err {
        StoreError::Conflict => GroupError::UsernameConflict,
        other => GroupError::Store(other),
    }
}

/// 可以持有用户名的对象
pub trait HandleOwner {
    const KIND: OwnerKind;

    fn owner_id(&self) -> i64;
}

impl HandleOwner for Group {
    const KIND: OwnerKind = OwnerKind::Group;

    fn owner_id(&self) -> i64 {
        self.id
    }
}

impl HandleOwner for User {
    const KIND: OwnerKind = OwnerKind::User;

    fn owner_id(&self) -> i64 {
        self.id
    }
}

pub struct UsernameAllocator {
    store: Arc<dyn GroupStore>,
    locks: KeyedLocks<String>,
}

impl UsernameAllocator {
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// 占用用户名后执行 `on_claimed`，其结果即分配结果
    ///
    /// 回调执行期间占用一直有效，同名的其他申请会等待并得到
    /// [`GroupError::UsernameConflict`]。回调里的存储方法在创建实体的同一个事务内
    /// 绑定占用；回调失败时占用被释放。
    pub async fn allocate<T, F, Fut>(&self, candidate: &str, on_claimed: F) -> Result<T, GroupError>
    where
        T: HandleOwner,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, GroupError>>,
    {
        let handle = candidate.to_ascii_lowercase();
        let _guard = self.locks.lock(handle.clone()).await;

        if !self.store.claim_username(&handle, T::KIND).await? {
            tracing::debug!("Username {} is already claimed", handle);
            return Err(GroupError::UsernameConflict);
        }

        match on_claimed(candidate.to_string()).await {
            Ok(owner) => {
                tracing::info!(
                    "Username {} allocated to {} {}",
                    handle,
                    T::KIND.as_str(),
                    owner.owner_id()
                );
                Ok(owner)
            }
            Err(e) => {
                if let Err(release_err) = self.store.release_username(&handle).await {
                    tracing::error!("Failed to release username {}: {}", handle, release_err);
                }
                Err(e)
            }
        }
    }
}
