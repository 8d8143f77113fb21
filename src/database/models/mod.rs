pub mod group;
pub mod user;

pub use group::{AdminLevel, ForeignGroupParams, Group, GroupAdmin, MembershipState};
pub use user::{RemoteUserParams, User};
