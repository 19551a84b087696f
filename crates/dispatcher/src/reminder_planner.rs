use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info, instrument};

use ruleflow_core::{
    config::ReminderConfig,
    models::JobMessage,
    traits::{MessageQueue, ReminderRepository, SubjectSource},
    EngineResult, Subject,
};
use ruleflow_domain::schedule::subject_minute_matches;
use ruleflow_infrastructure::MetricsCollector;

use crate::poller::truncate_to_minute;

/// 时间型提醒规划器
///
/// 与规则轮询器并行的每分钟扫描：不依赖规则配置，直接按主体的
/// 偏好时刻（或全局默认时刻）规划提醒槽位并派发发送动作。
/// 槽位落库在派发之前，`(subject_id, scheduled_at)` 唯一约束
/// 保证同一分钟的重复tick不会产生第二条投递记录。
pub struct ReminderPlanner {
    subject_source: Arc<dyn SubjectSource>,
    reminder_repo: Arc<dyn ReminderRepository>,
    message_queue: Arc<dyn MessageQueue>,
    job_queue_name: String,
    config: ReminderConfig,
    timezone: Tz,
    batch_size: i64,
    metrics: Arc<MetricsCollector>,
}

impl ReminderPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subject_source: Arc<dyn SubjectSource>,
        reminder_repo: Arc<dyn ReminderRepository>,
        message_queue: Arc<dyn MessageQueue>,
        job_queue_name: String,
        config: ReminderConfig,
        timezone: Tz,
        batch_size: i64,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            subject_source,
            reminder_repo,
            message_queue,
            job_queue_name,
            config,
            timezone,
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    /// 单次扫描：返回本分钟规划并派发的提醒数量
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        if !self.config.enabled {
            return Ok(0);
        }

        // 新资源上线是全局资格条件，每个tick查询一次
        let resource_cutoff = now - Duration::days(self.config.new_resource_days);
        let has_new_resources = self
            .subject_source
            .has_new_resources_since(resource_cutoff)
            .await?;

        let mut planned = 0usize;
        let mut offset = 0i64;
        loop {
            let batch = self
                .subject_source
                .list_subjects(offset, self.batch_size)
                .await?;
            let batch_len = batch.len() as i64;

            for subject in &batch {
                match self.plan_subject(subject, now, has_new_resources).await {
                    Ok(true) => planned += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!("主体 {} 的提醒规划失败: {e}", subject.id);
                    }
                }
            }

            if batch_len < self.batch_size {
                break;
            }
            offset += batch_len;
        }

        if planned > 0 {
            info!("本分钟规划了 {planned} 条提醒");
        }
        Ok(planned)
    }

    /// 规划单个主体；true 表示本分钟为其派发了提醒
    async fn plan_subject(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
        has_new_resources: bool,
    ) -> EngineResult<bool> {
        if !subject.receive_reminders {
            return Ok(false);
        }

        if !subject_minute_matches(
            subject.preferred_time.as_deref(),
            &self.config.default_time,
            now,
            self.timezone,
        ) {
            return Ok(false);
        }

        if !self.qualifies(subject, now, has_new_resources) {
            debug!("主体 {} 本分钟命中但不具备提醒资格", subject.id);
            return Ok(false);
        }

        // 同一本地日已发送过则不再规划
        if let Some(last_sent) = subject.last_reminder_sent_at {
            let today = now.with_timezone(&self.timezone).date_naive();
            if last_sent.with_timezone(&self.timezone).date_naive() == today {
                debug!("主体 {} 今天已收到提醒，跳过", subject.id);
                return Ok(false);
            }
        }

        let slot = truncate_to_minute(now);
        if self.slot_already_planned(subject.id, slot).await? {
            debug!("主体 {} 的槽位 {} 已规划，跳过", subject.id, slot);
            return Ok(false);
        }

        let job = self.reminder_repo.upsert_slot(subject.id, slot).await?;
        let message = JobMessage::action(
            "send_reminder",
            subject.id,
            None,
            serde_json::json!({ "reminder_job_id": job.id }),
        )
        .with_correlation_id(&format!("reminder-{}", job.id));

        self.message_queue
            .publish_message(&self.job_queue_name, &message)
            .await?;
        self.metrics.record_job_dispatched();
        Ok(true)
    }

    /// 资格条件：长期不活跃，或近期有新资源上线
    fn qualifies(&self, subject: &Subject, now: DateTime<Utc>, has_new_resources: bool) -> bool {
        if has_new_resources {
            return true;
        }
        match subject.last_activity_at {
            Some(last) => now - last >= Duration::days(self.config.inactive_days),
            // 从未活跃过视为不活跃
            None => true,
        }
    }

    async fn slot_already_planned(
        &self,
        subject_id: i64,
        slot: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let jobs = self.reminder_repo.list_for_subject(subject_id).await?;
        Ok(jobs.iter().any(|job| job.scheduled_at == slot))
    }
}
