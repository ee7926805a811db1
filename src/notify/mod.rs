//! 通知模块
//!
//! 事件键由 日期|店铺|时段|事件类型 组成，同一逻辑事件每天至多推送一次。
//! 推送失败不记键，下一次扫描会重试。

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::store::NotifyDedup;

/// 通知协作方
#[async_trait::async_trait]
pub trait NotifySink: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// HTTP 推送
#[derive(Debug, Clone)]
pub struct HttpNotifySink {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpNotifySink {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait::async_trait]
impl NotifySink for HttpNotifySink {
    async fn send(&self, text: &str) -> Result<()> {
        let payload = serde_json::json!({ "text": text });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("请求通知服务失败")?;
        if !response.status().is_success() {
            return Err(anyhow!("通知服务返回 {}", response.status()));
        }
        Ok(())
    }
}

/// 未配置通知端点时的空实现
#[derive(Debug, Clone, Default)]
pub struct NoopNotifySink;

#[async_trait::async_trait]
impl NotifySink for NoopNotifySink {
    async fn send(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// 组装事件键：日期|店铺|时段|事件类型
pub fn event_key(date: &str, shop: &str, slot: Option<usize>, kind: &str) -> String {
    match slot {
        Some(idx) => format!("{}|{}|slot{}|{}", date, shop, idx, kind),
        None => format!("{}|{}|{}", date, shop, kind),
    }
}

/// 按事件键去重推送
///
/// 只有发送成功才记键；失败只记日志，键保持未发送状态。
pub async fn notify_once<D: NotifyDedup + ?Sized>(
    dedup: &D,
    sink: &dyn NotifySink,
    key: &str,
    text: &str,
) {
    if dedup.already_sent(key).await {
        return;
    }
    match sink.send(text).await {
        Ok(()) => {
            if let Err(e) = dedup.mark_sent(key).await {
                warn!("记录通知去重键失败: {}", e);
            }
            info!("通知已发送 [{}]: {}", key, text);
        }
        Err(e) => warn!("通知发送失败 [{}]: {}", key, e),
    }
}
