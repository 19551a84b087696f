use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use tracing::{info, instrument, warn};

use ruleflow_core::{
    models::ActionMessage,
    traits::{
        ActionExecutor, ArtifactStore, ChatNotifier, EmailNotifier, ExecutionOutcome,
        ReminderRepository, SubjectSource,
    },
    Subject,
};
use ruleflow_infrastructure::MetricsCollector;

use crate::reports::{
    period_label, previous_month_range, render_activities_csv, render_report_html, ActivitySummary,
};

/// 动作执行器注册表，按动作名分发
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

/// 提醒发送执行器
///
/// 逐渠道尝试发送；至少一个渠道成功即视为已送达，
/// 全部渠道失败才算失败（可重试）。发送成功后回写主体的
/// 最近提醒标记，供规划器做同日去重。
pub struct SendReminderExecutor {
    subject_source: Arc<dyn SubjectSource>,
    reminder_repo: Arc<dyn ReminderRepository>,
    chat_notifier: Arc<dyn ChatNotifier>,
    email_notifier: Arc<dyn EmailNotifier>,
    metrics: Arc<MetricsCollector>,
}

impl SendReminderExecutor {
    pub fn new(
        subject_source: Arc<dyn SubjectSource>,
        reminder_repo: Arc<dyn ReminderRepository>,
        chat_notifier: Arc<dyn ChatNotifier>,
        email_notifier: Arc<dyn EmailNotifier>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            subject_source,
            reminder_repo,
            chat_notifier,
            email_notifier,
            metrics,
        }
    }

    fn reminder_text(subject: &Subject) -> String {
        format!(
            "Hi {}! We miss you — it's been a while since your last booking. \
             Come back and reserve a slot today!",
            subject.name
        )
    }

    fn reminder_html(subject: &Subject) -> String {
        format!(
            "<html><body><p>Hi {},</p>\
             <p>We miss you! It's been a while since your last booking. \
             Come back and reserve a slot today.</p></body></html>",
            subject.name
        )
    }

    async fn mark_job(&self, message: &ActionMessage, sent: bool) {
        let Some(job_id) = message
            .params
            .get("reminder_job_id")
            .and_then(|v| v.as_i64())
        else {
            return;
        };
        let result = if sent {
            self.reminder_repo.mark_sent(job_id, Utc::now()).await
        } else {
            self.reminder_repo.mark_failed(job_id).await
        };
        if let Err(e) = result {
            warn!("回写提醒作业 {job_id} 状态失败: {e}");
        }
    }

    async fn mark_job_skipped(&self, message: &ActionMessage) {
        let Some(job_id) = message
            .params
            .get("reminder_job_id")
            .and_then(|v| v.as_i64())
        else {
            return;
        };
        if let Err(e) = self.reminder_repo.mark_skipped(job_id).await {
            warn!("回写提醒作业 {job_id} 跳过状态失败: {e}");
        }
    }
}

#[async_trait]
impl ActionExecutor for SendReminderExecutor {
    fn name(&self) -> &'static str {
        "send_reminder"
    }

    #[instrument(skip(self, message), fields(subject_id = %message.subject_id))]
    async fn execute(&self, message: &ActionMessage) -> ExecutionOutcome {
        let subject = match self.subject_source.get_subject(message.subject_id).await {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                // 主体已消失，重试也不会成功
                self.mark_job_skipped(message).await;
                return ExecutionOutcome::FatalError(format!(
                    "主体不存在: {}",
                    message.subject_id
                ));
            }
            Err(e) => return ExecutionOutcome::RetryableError(format!("读取主体失败: {e}")),
        };

        if !subject.receive_reminders {
            info!("主体 {} 已退订提醒，跳过", subject.id);
            self.mark_job_skipped(message).await;
            return ExecutionOutcome::Ok;
        }
        if subject.available_channels().is_empty() {
            info!("主体 {} 未开通任何通知渠道，跳过", subject.id);
            self.mark_job_skipped(message).await;
            return ExecutionOutcome::Ok;
        }

        let mut delivered = false;

        if let Some(webhook_url) = &subject.webhook_url {
            match self
                .chat_notifier
                .send_chat(webhook_url, &Self::reminder_text(&subject))
                .await
            {
                Ok(()) => delivered = true,
                Err(e) => {
                    self.metrics.record_send_failure("chat");
                    warn!("主体 {} 的chat提醒发送失败: {e}", subject.id);
                }
            }
        }

        if let Some(email) = &subject.email {
            match self
                .email_notifier
                .send_email(
                    email,
                    "We miss you!",
                    &Self::reminder_html(&subject),
                    Vec::new(),
                )
                .await
            {
                Ok(()) => delivered = true,
                Err(e) => {
                    self.metrics.record_send_failure("email");
                    warn!("主体 {} 的email提醒发送失败: {e}", subject.id);
                }
            }
        }

        if delivered {
            self.mark_job(message, true).await;
            if let Err(e) = self
                .subject_source
                .mark_reminder_sent(subject.id, Utc::now())
                .await
            {
                warn!("更新主体 {} 的最近提醒标记失败: {e}", subject.id);
            }
            self.metrics.record_reminder_sent();
            ExecutionOutcome::Ok
        } else {
            self.mark_job(message, false).await;
            ExecutionOutcome::RetryableError(format!("主体 {} 的全部渠道发送失败", subject.id))
        }
    }
}

/// 月度报告执行器：汇总上月活动，制品落盘后邮件送达链接
pub struct GenerateReportExecutor {
    subject_source: Arc<dyn SubjectSource>,
    artifact_store: Arc<dyn ArtifactStore>,
    email_notifier: Arc<dyn EmailNotifier>,
    timezone: Tz,
    signed_url_ttl: Duration,
}

impl GenerateReportExecutor {
    pub fn new(
        subject_source: Arc<dyn SubjectSource>,
        artifact_store: Arc<dyn ArtifactStore>,
        email_notifier: Arc<dyn EmailNotifier>,
        timezone: Tz,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            subject_source,
            artifact_store,
            email_notifier,
            timezone,
            signed_url_ttl,
        }
    }
}

#[async_trait]
impl ActionExecutor for GenerateReportExecutor {
    fn name(&self) -> &'static str {
        "generate_report"
    }

    #[instrument(skip(self, message), fields(subject_id = %message.subject_id))]
    async fn execute(&self, message: &ActionMessage) -> ExecutionOutcome {
        let subject = match self.subject_source.get_subject(message.subject_id).await {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                return ExecutionOutcome::FatalError(format!(
                    "主体不存在: {}",
                    message.subject_id
                ))
            }
            Err(e) => return ExecutionOutcome::RetryableError(format!("读取主体失败: {e}")),
        };

        let Some(email) = subject.email.clone() else {
            info!("主体 {} 没有邮箱，跳过月报", subject.id);
            return ExecutionOutcome::Ok;
        };

        let now = Utc::now();
        let (from, until) = previous_month_range(now, self.timezone);
        let period = period_label(from, self.timezone);

        let activities = match self
            .subject_source
            .activities_between(subject.id, from, until)
            .await
        {
            Ok(activities) => activities,
            Err(e) => return ExecutionOutcome::RetryableError(format!("读取活动记录失败: {e}")),
        };

        let summary = ActivitySummary::from_activities(&activities);
        let html = render_report_html(&subject.name, &period, &summary);

        let key = format!("reports/{period}/subject-{}.html", subject.id);
        if let Err(e) = self.artifact_store.put(&key, html.as_bytes()).await {
            return ExecutionOutcome::RetryableError(format!("报告制品写入失败: {e}"));
        }
        let url = match self.artifact_store.signed_url(&key, self.signed_url_ttl).await {
            Ok(url) => url,
            Err(e) => return ExecutionOutcome::RetryableError(format!("签名URL生成失败: {e}")),
        };

        let body = format!(
            "{html}<p><a href=\"{url}\">在浏览器中查看本报告</a></p>",
        );
        if let Err(e) = self
            .email_notifier
            .send_email(&email, &format!("{period} 月度活动报告"), &body, Vec::new())
            .await
        {
            return ExecutionOutcome::RetryableError(format!("月报邮件发送失败: {e}"));
        }

        info!("主体 {} 的 {period} 月报已送达", subject.id);
        ExecutionOutcome::Ok
    }
}

/// 数据导出执行器：活动明细CSV落盘，邮件送达签名下载链接
pub struct ExportDataExecutor {
    subject_source: Arc<dyn SubjectSource>,
    artifact_store: Arc<dyn ArtifactStore>,
    email_notifier: Arc<dyn EmailNotifier>,
    signed_url_ttl: Duration,
}

impl ExportDataExecutor {
    pub fn new(
        subject_source: Arc<dyn SubjectSource>,
        artifact_store: Arc<dyn ArtifactStore>,
        email_notifier: Arc<dyn EmailNotifier>,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            subject_source,
            artifact_store,
            email_notifier,
            signed_url_ttl,
        }
    }
}

#[async_trait]
impl ActionExecutor for ExportDataExecutor {
    fn name(&self) -> &'static str {
        "export_data"
    }

    #[instrument(skip(self, message), fields(subject_id = %message.subject_id))]
    async fn execute(&self, message: &ActionMessage) -> ExecutionOutcome {
        let subject = match self.subject_source.get_subject(message.subject_id).await {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                return ExecutionOutcome::FatalError(format!(
                    "主体不存在: {}",
                    message.subject_id
                ))
            }
            Err(e) => return ExecutionOutcome::RetryableError(format!("读取主体失败: {e}")),
        };

        let Some(email) = subject.email.clone() else {
            info!("主体 {} 没有邮箱，跳过数据导出", subject.id);
            return ExecutionOutcome::Ok;
        };

        // 导出回溯天数可经动作参数覆盖
        let days = message
            .params
            .get("days")
            .and_then(|v| v.as_i64())
            .unwrap_or(30)
            .max(1);
        let until = Utc::now();
        let from = until - ChronoDuration::days(days);

        let activities = match self
            .subject_source
            .activities_between(subject.id, from, until)
            .await
        {
            Ok(activities) => activities,
            Err(e) => return ExecutionOutcome::RetryableError(format!("读取活动记录失败: {e}")),
        };

        let csv = render_activities_csv(&activities);
        let key = format!(
            "exports/subject-{}-{}.csv",
            subject.id,
            until.format("%Y%m%d%H%M%S")
        );
        if let Err(e) = self.artifact_store.put(&key, csv.as_bytes()).await {
            return ExecutionOutcome::RetryableError(format!("导出制品写入失败: {e}"));
        }
        let url = match self.artifact_store.signed_url(&key, self.signed_url_ttl).await {
            Ok(url) => url,
            Err(e) => return ExecutionOutcome::RetryableError(format!("签名URL生成失败: {e}")),
        };

        let body = format!(
            "<html><body><p>Hi {},</p>\
             <p>Your activity export for the last {days} days is ready. \
             <a href=\"{url}\">Download CSV</a> (link expires in {} hours).</p>\
             </body></html>",
            subject.name,
            self.signed_url_ttl.as_secs() / 3600,
        );
        if let Err(e) = self
            .email_notifier
            .send_email(&email, "Your data export is ready", &body, Vec::new())
            .await
        {
            return ExecutionOutcome::RetryableError(format!("导出邮件发送失败: {e}"));
        }

        info!("主体 {} 的数据导出已送达, 共 {} 条记录", subject.id, activities.len());
        ExecutionOutcome::Ok
    }
}
