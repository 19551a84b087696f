use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info, instrument, warn};

use ruleflow_core::{
    models::{JobMessage, ScheduledJobRun},
    traits::{MessageQueue, RuleRepository, RunRepository},
    EngineError, EngineResult, Rule,
};
use ruleflow_domain::schedule::{is_due_now, TICK_SECONDS};
use ruleflow_infrastructure::MetricsCollector;

/// 规则轮询器
///
/// 每个tick重新从存储读取启用的规则并评估调度到期性。
/// 单条规则的失败被隔离，不影响同一tick内其余规则的评估。
pub struct RulePoller {
    rule_repo: Arc<dyn RuleRepository>,
    run_repo: Arc<dyn RunRepository>,
    message_queue: Arc<dyn MessageQueue>,
    job_queue_name: String,
    timezone: Tz,
    metrics: Arc<MetricsCollector>,
}

impl RulePoller {
    pub fn new(
        rule_repo: Arc<dyn RuleRepository>,
        run_repo: Arc<dyn RunRepository>,
        message_queue: Arc<dyn MessageQueue>,
        job_queue_name: String,
        timezone: Tz,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            rule_repo,
            run_repo,
            message_queue,
            job_queue_name,
            timezone,
            metrics,
        }
    }

    /// 单次轮询：评估全部启用规则，返回本tick派发的运行记录
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> EngineResult<Vec<ScheduledJobRun>> {
        let start = std::time::Instant::now();
        let rules = self.rule_repo.get_enabled().await?;
        debug!("轮询开始，启用规则 {} 条", rules.len());

        let mut dispatched = Vec::new();
        for rule in &rules {
            match self.evaluate_rule(rule, now).await {
                Ok(Some(run)) => dispatched.push(run),
                Ok(None) => {}
                Err(e) => {
                    error!("规则 {} ({}) 评估失败: {e}", rule.id, rule.name);
                }
            }
        }

        self.metrics.record_poll_tick(start.elapsed().as_secs_f64());
        if let Ok(depth) = self.message_queue.get_queue_size(&self.job_queue_name).await {
            self.metrics.update_job_queue_depth(depth as f64);
        }
        if !dispatched.is_empty() {
            info!("本tick派发了 {} 条规则执行", dispatched.len());
        }
        Ok(dispatched)
    }

    /// 评估单条规则；到期且本分钟未派发过则落审计记录并发消息
    async fn evaluate_rule(
        &self,
        rule: &Rule,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ScheduledJobRun>> {
        if !is_due_now(&rule.schedule, now, self.timezone) {
            return Ok(None);
        }

        // 同一分钟窗口内已有运行记录即视为重复tick，跳过
        let minute_start = truncate_to_minute(now);
        let minute_end = minute_start + Duration::seconds(TICK_SECONDS);
        if self
            .run_repo
            .exists_in_window(rule.id, minute_start, minute_end)
            .await?
        {
            debug!("规则 {} 本分钟已派发，跳过", rule.name);
            return Ok(None);
        }

        let run = self.dispatch(rule, now).await?;
        self.metrics.record_rule_fired(&rule.name);
        Ok(Some(run))
    }

    /// 手动触发一条规则，绕过调度评估但保留审计与派发路径
    #[instrument(skip(self))]
    pub async fn run_rule_now(&self, rule_id: i64) -> EngineResult<ScheduledJobRun> {
        let rule = self
            .rule_repo
            .get_by_id(rule_id)
            .await?
            .ok_or(EngineError::RuleNotFound { id: rule_id })?;
        if !rule.enabled {
            warn!("手动触发已禁用的规则 {}", rule.name);
        }
        self.dispatch(&rule, Utc::now()).await
    }

    async fn dispatch(&self, rule: &Rule, now: DateTime<Utc>) -> EngineResult<ScheduledJobRun> {
        let run = self
            .run_repo
            .create(&ScheduledJobRun::new(rule.id, now))
            .await?;

        let message = JobMessage::run_rule(rule.id, run.id)
            .with_correlation_id(&format!("run-{}", run.id));
        self.message_queue
            .publish_message(&self.job_queue_name, &message)
            .await?;
        self.metrics.record_job_dispatched();

        self.rule_repo.update_last_run(rule.id, now).await?;
        info!(
            "规则 {} ({}) 已派发, run_id={}, 调度类型={}",
            rule.id,
            rule.name,
            run.id,
            rule.schedule.kind()
        );
        Ok(run)
    }
}

/// 将时刻截断到整分钟
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ruleflow_core::models::{JobPayload, ScheduleSpec};
    use ruleflow_testing_utils::{MockMessageQueue, MockRuleRepository, MockRunRepository, RuleBuilder};

    const IST: Tz = chrono_tz::Asia::Kolkata;

    fn ist(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        IST.with_ymd_and_hms(2026, 7, 15, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn poller(
        rules: Vec<Rule>,
    ) -> (
        RulePoller,
        Arc<MockRunRepository>,
        Arc<MockMessageQueue>,
    ) {
        let run_repo = Arc::new(MockRunRepository::new());
        let queue = Arc::new(MockMessageQueue::new());
        let poller = RulePoller::new(
            Arc::new(MockRuleRepository::with_rules(rules)),
            run_repo.clone(),
            queue.clone(),
            "jobs".to_string(),
            IST,
            Arc::new(MetricsCollector::new()),
        );
        (poller, run_repo, queue)
    }

    fn daily_rule(id: i64, time: &str) -> Rule {
        RuleBuilder::new()
            .with_id(id)
            .with_name(&format!("daily-{id}"))
            .with_schedule(ScheduleSpec::Daily {
                time: time.to_string(),
            })
            .build()
    }

    #[tokio::test]
    async fn test_due_rule_creates_run_and_message() {
        let (poller, run_repo, queue) = poller(vec![daily_rule(1, "09:00")]);

        let dispatched = poller.tick(ist(9, 0, 5)).await.unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(run_repo.count(), 1);

        let messages = queue.peek("jobs");
        assert_eq!(messages.len(), 1);
        match &messages[0].payload {
            JobPayload::RunRule(msg) => {
                assert_eq!(msg.rule_id, 1);
                assert_eq!(msg.run_id, dispatched[0].id);
            }
            other => panic!("载荷类型不符: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_off_minute_dispatches_nothing() {
        let (poller, run_repo, queue) = poller(vec![daily_rule(1, "09:00")]);

        let dispatched = poller.tick(ist(9, 1, 0)).await.unwrap();
        assert!(dispatched.is_empty());
        assert_eq!(run_repo.count(), 0);
        assert!(queue.peek("jobs").is_empty());
    }

    #[tokio::test]
    async fn test_same_minute_tick_is_deduplicated() {
        let (poller, run_repo, _queue) = poller(vec![daily_rule(1, "09:00")]);

        poller.tick(ist(9, 0, 2)).await.unwrap();
        let second = poller.tick(ist(9, 0, 40)).await.unwrap();

        assert!(second.is_empty());
        assert_eq!(run_repo.count(), 1);
    }

    #[tokio::test]
    async fn test_failing_rule_does_not_block_others() {
        // 规则2的调度无效（时刻解析失败按不到期处理），规则1照常派发
        let bad = RuleBuilder::new()
            .with_id(2)
            .with_name("broken")
            .with_schedule(ScheduleSpec::Daily {
                time: "nonsense".to_string(),
            })
            .build();
        let (poller, run_repo, _queue) = poller(vec![bad, daily_rule(1, "09:00")]);

        let dispatched = poller.tick(ist(9, 0, 0)).await.unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].rule_id, 1);
        assert_eq!(run_repo.count(), 1);
    }

    #[tokio::test]
    async fn test_run_rule_now_bypasses_schedule() {
        let (poller, run_repo, queue) = poller(vec![daily_rule(1, "23:59")]);

        let run = poller.run_rule_now(1).await.unwrap();
        assert_eq!(run.rule_id, 1);
        assert_eq!(run_repo.count(), 1);
        assert_eq!(queue.peek("jobs").len(), 1);
    }

    #[tokio::test]
    async fn test_run_rule_now_missing_rule() {
        let (poller, _run_repo, _queue) = poller(vec![]);
        assert!(matches!(
            poller.run_rule_now(404).await,
            Err(EngineError::RuleNotFound { id: 404 })
        ));
    }
}
