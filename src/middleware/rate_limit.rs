use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::utils::{error_codes, error_to_api_response};

const KEY_PREFIX: &str = "groups:rate_limit:";

/// 基于 Redis 计数器的固定窗口限流
#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(redis: Arc<redis::Client>, window: Duration, max_requests: u32) -> Self {
        Self {
            redis,
            window,
            max_requests,
        }
    }

    /// 代理头优先，其次使用连接地址
    fn client_ip(req: &Request<Body>) -> String {
        let remote_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());
        req.headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
            .or(remote_ip.as_deref())
            .unwrap_or("unknown")
            .trim()
            .to_string()
    }

    async fn hit(&self, ip: &str) -> redis::RedisResult<u32> {
        let key = format!("{}{}", KEY_PREFIX, ip);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let count: u32 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&key, self.window.as_secs() as i64).await?;
        }
        Ok(count)
    }

    pub async fn check_rate_limit(&self, req: Request<Body>, next: Next) -> Response {
        let ip = Self::client_ip(&req);
        match self.hit(&ip).await {
            Ok(count) if count > self.max_requests => {
                tracing::debug!("Rate limit exceeded for {}", ip);
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    error_to_api_response::<()>(
                        error_codes::RATE_LIMIT,
                        format!("请求过于频繁，请在{}秒后重试", self.window.as_secs()),
                    ),
                )
                    .into_response();
            }
            Ok(_) => {}
            // Redis 不可用时不阻断请求
            Err(e) => tracing::warn!("Rate limiter unavailable: {}", e),
        }
        next.run(req).await
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}
