use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use groups_backend::{
    AppState,
    config::Config,
    database::{GroupStore, PgGroupStore},
    federation::{DispatcherConfig, FederationDispatcher, HttpTransport},
    group::{GroupService, UsernameAllocator},
    middleware::RateLimiter,
    router::build_router,
    user::AccountService,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'groups_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    let pg_store = PgGroupStore::new(pool);
    pg_store.migrate().await.expect("Failed to run migrations");
    let store: Arc<dyn GroupStore> = Arc::new(pg_store);

    // 启动联邦投递
    let transport = HttpTransport::new(config.federation_timeout())
        .expect("Failed to create federation HTTP client");
    let dispatcher = FederationDispatcher::start(
        DispatcherConfig::from_config(&config),
        Arc::new(transport),
        store.clone(),
    );

    // 用户与群组共用一个用户名分配器
    let allocator = Arc::new(UsernameAllocator::new(store.clone()));
    let groups = Arc::new(GroupService::new(
        store.clone(),
        allocator.clone(),
        dispatcher.clone(),
    ));
    let accounts = Arc::new(AccountService::new(store, allocator));

    // 设置 Redis 客户端，只用于限流
    let redis_client = Arc::new(
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client"),
    );
    let rate_limiter = Arc::new(RateLimiter::new(
        redis_client,
        config.rate_limit_window(),
        config.rate_limit_requests,
    ));

    let state = AppState {
        config: config.clone(),
        groups,
        accounts,
    };
    let app = build_router(state, Some(rate_limiter));

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // 等待已入队的联邦活动投递完毕
    dispatcher.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
