use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    /// 本站的基础 URI，用于生成 actor ID，例如 https://groups.example
    pub local_domain: String,
    pub federation_workers: usize,
    pub federation_max_attempts: u32,
    pub federation_initial_backoff_ms: u64,
    pub federation_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")?
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")?.parse().unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")?.parse().unwrap_or(100),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".into()),
            local_domain: env::var("LOCAL_DOMAIN")?
                .trim_end_matches('/')
                .to_string(),
            // 联邦投递相关配置都有默认值
            federation_workers: optional_var("FEDERATION_WORKERS", 4),
            federation_max_attempts: optional_var("FEDERATION_MAX_ATTEMPTS", 5),
            federation_initial_backoff_ms: optional_var("FEDERATION_INITIAL_BACKOFF_MS", 500),
            federation_timeout_secs: optional_var("FEDERATION_TIMEOUT_SECS", 10),
        })
    }

    /// 测试用的固定配置
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/groups_test".into(),
            redis_url: "redis://127.0.0.1/".into(),
            jwt_secret: "test-secret".into(),
            jwt_expiration_secs: 3600,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            local_domain: "https://groups.test".into(),
            federation_workers: 2,
            federation_max_attempts: 3,
            federation_initial_backoff_ms: 1,
            federation_timeout_secs: 1,
        }
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn federation_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.federation_initial_backoff_ms)
    }

    pub fn federation_timeout(&self) -> Duration {
        Duration::from_secs(self.federation_timeout_secs)
    }
}

fn optional_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
