use async_trait::async_trait;
use std::time::Duration;

use crate::EngineResult;

/// 聊天通知沉降端：webhook POST JSON `{"text": ...}`
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn send_chat(&self, webhook_url: &str, text: &str) -> EngineResult<()>;
}

/// 邮件附件
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// 邮件通知沉降端：HTML正文 + 可选附件的事务性发送
#[async_trait]
pub trait EmailNotifier: Send + Sync {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        attachments: Vec<EmailAttachment>,
    ) -> EngineResult<()>;
}

/// 制品存储：按键上传 + 限时签名URL
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> EngineResult<()>;

    async fn signed_url(&self, key: &str, ttl: Duration) -> EngineResult<String>;
}
