// 数据库模块
// 包含实体定义、存储抽象与具体实现

pub mod models; // 数据库实体定义
pub mod operations; // 存储实现
pub mod store; // 存储抽象

// 重新导出常用类型，方便其他模块使用
pub use models::{AdminLevel, Group, MembershipState, User};
pub use operations::{MemoryGroupStore, PgGroupStore};
pub use store::{GroupStore, OwnerKind, STALE_CLAIM_AFTER, StoreError};
