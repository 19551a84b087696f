use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

use ruleflow_core::{traits::ChatNotifier, EngineError, EngineResult};

/// 基于HTTP webhook的聊天通知实现
///
/// 消息体固定为 `{"text": ...}`，兼容常见群机器人的入站webhook格式。
pub struct WebhookChatNotifier {
    client: reqwest::Client,
}

impl WebhookChatNotifier {
    pub fn new(timeout_seconds: u64) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| EngineError::Notification(format!("构建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChatNotifier for WebhookChatNotifier {
    #[instrument(skip(self, text))]
    async fn send_chat(&self, webhook_url: &str, text: &str) -> EngineResult<()> {
        let response = self
            .client
            .post(webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| EngineError::Notification(format!("webhook请求失败: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Notification(format!(
                "webhook返回非成功状态: {}",
                response.status()
            )));
        }

        debug!("聊天通知已发送");
        Ok(())
    }
}
