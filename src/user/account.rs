// 本地账号
// 注册与登录，用户名与群组共用同一个分配器

use std::sync::Arc;

use crate::database::{GroupStore, User};
use crate::error::GroupError;
use crate::group::{UsernameAllocator, handle_conflict, validate_handle};
use crate::utils::{hash_password, verify_password};

const MIN_PASSWORD_LEN: usize = 6;
// bcrypt 只使用前 72 字节
const MAX_PASSWORD_LEN: usize = 72;
const MAX_NICKNAME_LEN: usize = 64;

pub struct AccountService {
    store: Arc<dyn GroupStore>,
    allocator: Arc<UsernameAllocator>,
}

impl AccountService {
    pub fn new(store: Arc<dyn GroupStore>, allocator: Arc<UsernameAllocator>) -> Self {
        Self { store, allocator }
    }

    /// 注册本地账号，昵称为空时使用用户名
    pub async fn register(
        &self,
        username: &str,
        nickname: Option<&str>,
        password: &str,
    ) -> Result<User, GroupError> {
        validate_handle(username)?;
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
            return Err(GroupError::InvalidPassword);
        }
        let nickname: String = nickname
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(username)
            .chars()
            .take(MAX_NICKNAME_LEN)
            .collect();

        let password_hash = hash_password(password)
            .map_err(|e| GroupError::Internal(format!("failed to hash password: {}", e)))?;

        let store = self.store.clone();
        let user = self
            .allocator
            .allocate(username, move |handle| async move {
                store
                    .create_local_user(&handle, &nickname, &password_hash)
                    .await
                    .map_err(handle_conflict)
            })
            .await?;

        tracing::info!("Registered user {} ({})", user.id, user.username);
        Ok(user)
    }

    /// 用户名不区分大小写；远程账号没有密码，不能登录
    pub async fn login(&self, username: &str, password: &str) -> Result<User, GroupError> {
        let user = self
            .store
            .user_by_username(username)
            .await?
            .ok_or(GroupError::InvalidCredentials)?;
        let Some(hash) = user.password_hash.as_deref() else {
            return Err(GroupError::InvalidCredentials);
        };

        let valid = verify_password(password, hash)
            .map_err(|e| GroupError::Internal(format!("failed to verify password: {}", e)))?;
        if !valid {
            tracing::debug!("Wrong password for user {}", user.id);
            return Err(GroupError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn find(&self, user_id: i64) -> Result<User, GroupError> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or(GroupError::Unauthorized)
    }
}
