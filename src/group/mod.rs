// 群组核心
// 用户名分配、权限检查、成员状态机，以及把它们组合起来的服务

mod locks;

pub mod gate;
pub mod membership;
pub mod registry;
pub mod service;
pub mod username;

pub use gate::AuthorizationGate;
pub use membership::MembershipStateMachine;
pub use registry::GroupRegistry;
pub use service::{GroupProfile, GroupService, MEMBERS_PAGE_SIZE, MemberPage};
pub use username::{HandleOwner, UsernameAllocator, handle_conflict, validate_handle};
