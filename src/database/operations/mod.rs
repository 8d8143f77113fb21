pub mod memory;
pub mod postgres;

pub use memory::MemoryGroupStore;
pub use postgres::PgGroupStore;
