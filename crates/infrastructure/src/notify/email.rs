use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, instrument};

use ruleflow_core::{
    config::NotifierConfig,
    traits::{EmailAttachment, EmailNotifier},
    EngineError, EngineResult,
};

/// 基于SMTP的邮件通知实现，HTML正文加可选附件
pub struct SmtpEmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailNotifier {
    pub fn new(config: &NotifierConfig) -> EngineResult<Self> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| EngineError::Configuration(format!("无效的发件人地址: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| EngineError::Configuration(format!("SMTP中继配置失败: {e}")))?
            .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailNotifier for SmtpEmailNotifier {
    #[instrument(skip(self, html_body, attachments), fields(attachment_count = attachments.len()))]
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        attachments: Vec<EmailAttachment>,
    ) -> EngineResult<()> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| EngineError::Notification(format!("无效的收件人地址 {to}: {e}")))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject);

        let html_part = SinglePart::html(html_body.to_string());

        let message = if attachments.is_empty() {
            builder
                .singlepart(html_part)
                .map_err(|e| EngineError::Notification(format!("构建邮件失败: {e}")))?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(html_part);
            for attachment in attachments {
                let content_type = ContentType::parse(&attachment.content_type)
                    .map_err(|e| EngineError::Notification(format!("无效的附件类型: {e}")))?;
                multipart = multipart.singlepart(
                    Attachment::new(attachment.filename).body(attachment.bytes, content_type),
                );
            }
            builder
                .multipart(multipart)
                .map_err(|e| EngineError::Notification(format!("构建邮件失败: {e}")))?
        };

        self.mailer
            .send(message)
            .await
            .map_err(|e| EngineError::Notification(format!("SMTP发送失败: {e}")))?;

        info!("邮件已发送至 {to}");
        Ok(())
    }
}
