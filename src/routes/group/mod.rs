mod handler;
mod model;

pub use handler::{
    create_group, edit_group, get_group, get_members, join_group, leave_group, my_groups,
    set_admin_level,
};
pub use model::{
    CreateGroupRequest, EditGroupRequest, JoinGroupResponse, MembersQuery, SetAdminLevelRequest,
};
