use std::sync::Arc;

use config::Config;
use group::GroupService;
use user::AccountService;

pub mod config;
pub mod database;
pub mod error;
pub mod federation;
pub mod group;
pub mod middleware;
pub mod result;
pub mod router;
pub mod routes;
pub mod user;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub groups: Arc<GroupService>,
    pub accounts: Arc<AccountService>,
}
