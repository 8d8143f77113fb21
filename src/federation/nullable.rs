//! 可控的投递通道，用于测试与本地开发
//!
//! 不访问网络，只记录投递结果；可以让前若干次投递失败，或让某个收件箱一直失败，
//! 以模拟远程故障。

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use super::activity::Activity;
use super::transport::{DeliveryError, DeliveryTransport};

/// 记录所有投递的通道
#[derive(Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<(String, Activity)>>,
    failures_left: AtomicU32,
    dead_inbox: Option<String>,
    attempts: AtomicU32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前 n 次投递返回 503
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// 投递到 `inbox` 的请求总是返回 503，其他收件箱正常
    pub fn with_dead_inbox(inbox: &str) -> Self {
        Self {
            dead_inbox: Some(inbox.to_string()),
            ..Self::default()
        }
    }

    /// 成功投递的 (inbox, activity)，按投递顺序
    pub fn delivered(&self) -> Vec<(String, Activity)> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// 包括失败在内的投递尝试次数
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn deliver(&self, inbox: &str, activity: &Activity) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.dead_inbox.as_deref() == Some(inbox) {
            return Err(DeliveryError::Rejected(503));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError::Rejected(503));
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((inbox.to_string(), activity.clone()));
        }
        Ok(())
    }
}
