use serde::{Deserialize, Serialize};

use crate::database::{AdminLevel, MembershipState};

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub username: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct EditGroupRequest {
    pub name: String,
    pub about: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetAdminLevelRequest {
    pub user_id: i64,
    pub level: AdminLevel,
}

#[derive(Debug, Default, Deserialize)]
pub struct MembersQuery {
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinGroupResponse {
    pub membership_state: MembershipState,
}
