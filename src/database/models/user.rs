use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 用户数据库实体，本地账号与远程账号镜像共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    /// 只有本地账号有密码
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_foreign: bool,
    pub ap_id: Option<String>,
    /// 远程账号的收件箱，群组更新会投递到这里
    pub inbox: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// 远程账号镜像的注册参数
#[derive(Debug, Clone)]
pub struct RemoteUserParams {
    pub username: String,
    pub nickname: String,
    pub ap_id: String,
    pub inbox: String,
}
