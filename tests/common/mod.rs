#![allow(dead_code)]

use std::sync::Arc;

use groups_backend::{
    config::Config,
    database::models::ForeignGroupParams,
    database::{Group, GroupStore, MemoryGroupStore, User},
    federation::{DispatcherConfig, FederationDispatcher, RecordingTransport},
    group::{GroupService, UsernameAllocator},
    user::AccountService,
};

/// 内存存储 + 记录型投递通道组装出的完整服务
pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryGroupStore>,
    pub transport: Arc<RecordingTransport>,
    pub dispatcher: Arc<FederationDispatcher>,
    pub allocator: Arc<UsernameAllocator>,
    pub groups: Arc<GroupService>,
    pub accounts: Arc<AccountService>,
}

impl Harness {
    /// 必须在 tokio 运行时内调用
    pub fn new() -> Self {
        Self::with_transport(RecordingTransport::new())
    }

    pub fn with_transport(transport: RecordingTransport) -> Self {
        Self::build(transport, |store| store as Arc<dyn GroupStore>)
    }

    /// 服务使用 `wrap` 包装后的存储，`store` 字段仍指向底层内存存储
    pub fn with_store(wrap: impl FnOnce(Arc<MemoryGroupStore>) -> Arc<dyn GroupStore>) -> Self {
        Self::build(RecordingTransport::new(), wrap)
    }

    fn build(
        transport: RecordingTransport,
        wrap: impl FnOnce(Arc<MemoryGroupStore>) -> Arc<dyn GroupStore>,
    ) -> Self {
        let config = Config::for_tests();
        let store = Arc::new(MemoryGroupStore::new());
        let transport = Arc::new(transport);
        let dyn_store = wrap(store.clone());
        let dispatcher = FederationDispatcher::start(
            DispatcherConfig::from_config(&config),
            transport.clone(),
            dyn_store.clone(),
        );
        let allocator = Arc::new(UsernameAllocator::new(dyn_store.clone()));
        let groups = Arc::new(GroupService::new(
            dyn_store.clone(),
            allocator.clone(),
            dispatcher.clone(),
        ));
        let accounts = Arc::new(AccountService::new(dyn_store, allocator.clone()));
        Self {
            config,
            store,
            transport,
            dispatcher,
            allocator,
            groups,
            accounts,
        }
    }

    /// 跳过 bcrypt，直接写入一个本地账号
    pub async fn user(&self, username: &str) -> User {
        self.store
            .create_local_user(username, username, "not-a-real-hash")
            .await
            .unwrap()
    }

    pub async fn foreign_group(&self, name: &str) -> Group {
        let base = format!("https://remote.example/groups/{}", name);
        self.groups
            .register_foreign_group(&ForeignGroupParams {
                username: format!("{}@remote.example", name),
                name: name.to_string(),
                about: None,
                ap_id: base.clone(),
                inbox: format!("{}/inbox", base),
            })
            .await
            .unwrap()
    }

    pub async fn member_count(&self, group_id: i64) -> i64 {
        self.store
            .group_by_id(group_id)
            .await
            .unwrap()
            .unwrap()
            .member_count
    }
}
