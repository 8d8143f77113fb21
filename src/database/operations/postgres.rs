// 群组存储库
// PostgreSQL 实现，成员状态与 member_count 在同一个事务中修改

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::database::models::{
    AdminLevel, ForeignGroupParams, Group, GroupAdmin, MembershipState, RemoteUserParams, User,
};
use crate::database::store::{GroupStore, OwnerKind, STALE_CLAIM_AFTER, StoreError};

const GROUP_COLUMNS: &str =
    "id, username, name, about, member_count, is_foreign, ap_id, inbox, created_at";
const USER_COLUMNS: &str =
    "id, username, nickname, password_hash, is_foreign, ap_id, inbox, created_at";

/// 基于 PostgreSQL 的群组存储
#[derive(Clone)]
pub struct PgGroupStore {
    pool: PgPool,
}

impl PgGroupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 执行内置的数据库迁移
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// 在实体所在的事务内把用户名绑定到新对象
///
/// 没有占用时直接写入；同类型的未绑定占用被更新；其余情况返回 Conflict，
/// 调用方的事务随之回滚，实体与占用要么都存在要么都不存在。
async fn bind_handle(
    tx: &mut Transaction<'_, Postgres>,
    handle: &str,
    owner: OwnerKind,
    owner_id: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO usernames (handle, owner_type, owner_id)
        VALUES (LOWER($1), $2, $3)
        ON CONFLICT (handle) DO UPDATE SET owner_id = EXCLUDED.owner_id
        WHERE usernames.owner_id IS NULL AND usernames.owner_type = EXCLUDED.owner_type
        "#,
    )
    .bind(handle)
    .bind(owner.as_str())
    .bind(owner_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict);
    }
    Ok(())
}

#[async_trait]
impl GroupStore for PgGroupStore {
    async fn claim_username(&self, handle: &str, owner: OwnerKind) -> Result<bool, StoreError> {
        // 主键冲突即表示已被占用，跨进程也只会有一个成功者；
        // 进程在绑定前退出留下的占用过期后可以被接管
        let result = sqlx::query(
            r#"
            INSERT INTO usernames (handle, owner_type)
            VALUES (LOWER($1), $2)
            ON CONFLICT (handle) DO UPDATE
                SET owner_type = EXCLUDED.owner_type, claimed_at = NOW()
                WHERE usernames.owner_id IS NULL
                  AND usernames.claimed_at < NOW() - make_interval(secs => $3)
            "#,
        )
        .bind(handle)
        .bind(owner.as_str())
        .bind(STALE_CLAIM_AFTER.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_username(&self, handle: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM usernames WHERE handle = LOWER($1) AND owner_id IS NULL")
            .bind(handle)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_group(
        &self,
        username: &str,
        name: &str,
        creator_id: i64,
    ) -> Result<Group, StoreError> {
        let mut tx = self.pool.begin().await?;

        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            INSERT INTO groups (username, name, member_count, is_foreign, created_at)
            VALUES ($1, $2, 1, FALSE, NOW())
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        // 创建者即成员，同时成为 OWNER
        sqlx::query("INSERT INTO group_memberships (group_id, user_id, state) VALUES ($1, $2, $3)")
            .bind(group.id)
            .bind(creator_id)
            .bind(MembershipState::Member.as_i16())
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO group_admins (group_id, user_id, level) VALUES ($1, $2, $3)")
            .bind(group.id)
            .bind(creator_id)
            .bind(AdminLevel::Owner.as_i16())
            .execute(&mut *tx)
            .await?;

        bind_handle(&mut tx, username, OwnerKind::Group, group.id).await?;

        tx.commit().await?;
        Ok(group)
    }

    async fn insert_foreign_group(
        &self,
        params: &ForeignGroupParams,
    ) -> Result<Group, StoreError> {
        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            INSERT INTO groups (username, name, about, member_count, is_foreign, ap_id, inbox)
            VALUES ($1, $2, $3, 0, TRUE, $4, $5)
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(&params.username)
        .bind(&params.name)
        .bind(&params.about)
        .bind(&params.ap_id)
        .bind(&params.inbox)
        .fetch_one(&self.pool)
        .await?;

        Ok(group)
    }

    async fn group_by_id(&self, group_id: i64) -> Result<Option<Group>, StoreError> {
        let group =
            sqlx::query_as::<_, Group>(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1"))
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(group)
    }

    async fn update_group_info(
        &self,
        group_id: i64,
        name: &str,
        about: Option<&str>,
    ) -> Result<Group, StoreError> {
        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            UPDATE groups
            SET name = $2, about = $3
            WHERE id = $1
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(name)
        .bind(about)
        .fetch_optional(&self.pool)
        .await?;

        group.ok_or(StoreError::NotFound)
    }

    async fn create_local_user(
        &self,
        username: &str,
        nickname: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, nickname, password_hash, is_foreign)
            VALUES ($1, $2, $3, FALSE)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(nickname)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await?;

        bind_handle(&mut tx, username, OwnerKind::User, user.id).await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn insert_remote_user(&self, params: &RemoteUserParams) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, nickname, is_foreign, ap_id, inbox)
            VALUES ($1, $2, TRUE, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&params.username)
        .bind(&params.nickname)
        .bind(&params.ap_id)
        .bind(&params.inbox)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(username) = LOWER($1)"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn membership_state(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<MembershipState, StoreError> {
        let state = sqlx::query(
            "SELECT state FROM group_memberships WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.try_get::<i16, _>("state"))
        .transpose()?
        .map(MembershipState::from_i16)
        .unwrap_or_default();

        Ok(state)
    }

    async fn insert_membership(
        &self,
        group_id: i64,
        user_id: i64,
        state: MembershipState,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO group_memberships (group_id, user_id, state)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, user_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(state.as_i16())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // 事务随 tx 被丢弃而回滚
            return Err(StoreError::Conflict);
        }

        let updated = sqlx::query("UPDATE groups SET member_count = member_count + 1 WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn accept_membership(&self, group_id: i64, user_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE group_memberships
            SET state = $4
            WHERE group_id = $1 AND user_id = $2 AND state = $3
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(MembershipState::TentativeMember.as_i16())
        .bind(MembershipState::Member.as_i16())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_membership(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<MembershipState, StoreError> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query(
            r#"
            DELETE FROM group_memberships
            WHERE group_id = $1 AND user_id = $2
            RETURNING state
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?
        .try_get::<i16, _>("state")?;

        sqlx::query(
            "UPDATE groups SET member_count = GREATEST(member_count - 1, 0) WHERE id = $1",
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MembershipState::from_i16(previous))
    }

    async fn admin_level(&self, group_id: i64, user_id: i64) -> Result<AdminLevel, StoreError> {
        let level = sqlx::query("SELECT level FROM group_admins WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get::<i16, _>("level"))
            .transpose()?
            .map(AdminLevel::from_i16)
            .unwrap_or_default();

        Ok(level)
    }

    async fn set_admin_level(
        &self,
        group_id: i64,
        user_id: i64,
        level: AdminLevel,
    ) -> Result<(), StoreError> {
        if level == AdminLevel::None {
            sqlx::query("DELETE FROM group_admins WHERE group_id = $1 AND user_id = $2")
                .bind(group_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO group_admins (group_id, user_id, level)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, user_id) DO UPDATE SET level = EXCLUDED.level
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(level.as_i16())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn admins(&self, group_id: i64) -> Result<Vec<GroupAdmin>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, level
            FROM group_admins
            WHERE group_id = $1
            ORDER BY level DESC, user_id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<GroupAdmin, StoreError> {
                Ok(GroupAdmin {
                    user_id: row.try_get("user_id")?,
                    level: AdminLevel::from_i16(row.try_get("level")?),
                })
            })
            .collect()
    }

    async fn members(
        &self,
        group_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.nickname, u.password_hash, u.is_foreign,
                   u.ap_id, u.inbox, u.created_at
            FROM group_memberships gm
            JOIN users u ON gm.user_id = u.id
            WHERE gm.group_id = $1 AND gm.state = $2
            ORDER BY u.id
            OFFSET $3
            LIMIT $4
            "#,
        )
        .bind(group_id)
        .bind(MembershipState::Member.as_i16())
        .bind(offset.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn user_groups(&self, user_id: i64) -> Result<Vec<Group>, StoreError> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.id, g.username, g.name, g.about, g.member_count, g.is_foreign,
                   g.ap_id, g.inbox, g.created_at
            FROM groups g
            JOIN group_memberships gm ON g.id = gm.group_id
            WHERE gm.user_id = $1 AND gm.state = $2
            ORDER BY g.id
            "#,
        )
        .bind(user_id)
        .bind(MembershipState::Member.as_i16())
        .fetch_all(&self.pool)
        .await?;

        Ok(groups)
    }

    async fn remote_member_inboxes(&self, group_id: i64) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT u.inbox
            FROM group_memberships gm
            JOIN users u ON gm.user_id = u.id
            WHERE gm.group_id = $1 AND u.is_foreign AND u.inbox IS NOT NULL
            ORDER BY u.inbox
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("inbox").map_err(StoreError::from))
            .collect()
    }
}
