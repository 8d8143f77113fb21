// 远程投递通道

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;

use super::activity::Activity;

const ACTIVITY_JSON: &str = "application/activity+json";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request to inbox failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("inbox rejected activity with status {0}")]
    Rejected(u16),
    #[error("failed to serialize activity: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 活动以 `application/activity+json` 发送，不使用 reqwest 的 json 编码
fn encode(activity: &Activity) -> Result<Vec<u8>, DeliveryError> {
    Ok(serde_json::to_vec(activity)?)
}

/// 把序列化后的活动投递到远程收件箱
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, inbox: &str, activity: &Activity) -> Result<(), DeliveryError>;
}

/// 基于 reqwest 的 HTTP 投递
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, inbox: &str, activity: &Activity) -> Result<(), DeliveryError> {
        let body = encode(activity)?;
        let response = self
            .http_client
            .post(inbox)
            .header(CONTENT_TYPE, ACTIVITY_JSON)
            .header(ACCEPT, ACTIVITY_JSON)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(status.as_u16()));
        }
        tracing::debug!("Delivered {} to {}", activity.id, inbox);
        Ok(())
    }
}
