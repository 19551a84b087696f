use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use ruleflow_core::{
    models::{JobMessage, RunRuleMessage, RunStatus},
    traits::{
        ExecutionOutcome, MessageQueue, ReminderRepository, RuleRepository, RunRepository,
        SubjectSource,
    },
    Rule, ScheduleSpec,
};
use ruleflow_domain::resolver::RuleResolver;
use ruleflow_domain::schedule::subject_minute_matches;

/// 规则执行器：消费一次规则触发，解析主体并扇出动作作业
pub struct RuleRunner {
    rule_repo: Arc<dyn RuleRepository>,
    run_repo: Arc<dyn RunRepository>,
    reminder_repo: Arc<dyn ReminderRepository>,
    resolver: Arc<RuleResolver>,
    subject_source: Arc<dyn SubjectSource>,
    message_queue: Arc<dyn MessageQueue>,
    job_queue_name: String,
    timezone: Tz,
}

impl RuleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_repo: Arc<dyn RuleRepository>,
        run_repo: Arc<dyn RunRepository>,
        reminder_repo: Arc<dyn ReminderRepository>,
        resolver: Arc<RuleResolver>,
        subject_source: Arc<dyn SubjectSource>,
        message_queue: Arc<dyn MessageQueue>,
        job_queue_name: String,
        timezone: Tz,
    ) -> Self {
        Self {
            rule_repo,
            run_repo,
            reminder_repo,
            resolver,
            subject_source,
            message_queue,
            job_queue_name,
            timezone,
        }
    }

    /// 执行一次规则触发；内部失败被捕获并映射到结果标签
    #[instrument(skip(self, message), fields(rule_id = %message.rule_id, run_id = %message.run_id))]
    pub async fn run(&self, message: &RunRuleMessage) -> ExecutionOutcome {
        match self.run_inner(message).await {
            Ok(outcome) => outcome,
            Err(error) => {
                // 失败先落审计，再把可重试结果交还执行基座
                let details = serde_json::json!({ "error": error });
                if let Err(e) = self
                    .run_repo
                    .update_status(message.run_id, RunStatus::Failed, Some(&details))
                    .await
                {
                    warn!("回写运行 {} 失败状态出错: {e}", message.run_id);
                }
                ExecutionOutcome::RetryableError(error)
            }
        }
    }

    async fn run_inner(&self, message: &RunRuleMessage) -> Result<ExecutionOutcome, String> {
        let rule = self
            .rule_repo
            .get_by_id(message.rule_id)
            .await
            .map_err(|e| format!("读取规则失败: {e}"))?;

        // 规则在调度后被删除：静默no-op而非错误
        let Some(rule) = rule else {
            info!("规则 {} 已不存在，跳过运行 {}", message.rule_id, message.run_id);
            return Ok(ExecutionOutcome::Ok);
        };

        self.run_repo
            .update_status(message.run_id, RunStatus::Running, None)
            .await
            .map_err(|e| format!("标记运行为Running失败: {e}"))?;

        let now = Utc::now();
        let resolved = self
            .resolver
            .resolve_subjects(&rule, now)
            .await
            .map_err(|e| format!("解析主体失败: {e}"))?;
        let matched = resolved.len();

        let final_subjects = self
            .refine_per_subject_minute(&rule, resolved)
            .await
            .map_err(|e| format!("逐主体时刻细化失败: {e}"))?;

        // 提醒类动作以运行时间为槽位建立投递记录，重试复用同一条
        let slot = self
            .run_repo
            .get_by_id(message.run_id)
            .await
            .map_err(|e| format!("读取运行记录失败: {e}"))?
            .map(|run| run.run_time)
            .unwrap_or(now);

        let mut dispatched = 0usize;
        for subject_id in &final_subjects {
            for action in &rule.actions {
                let mut params = action.params.clone();
                if action.action_name == "send_reminder" {
                    let job = self
                        .reminder_repo
                        .upsert_slot(*subject_id, slot)
                        .await
                        .map_err(|e| format!("创建提醒投递记录失败: {e}"))?;
                    if let Some(map) = params.as_object_mut() {
                        map.insert("reminder_job_id".to_string(), serde_json::json!(job.id));
                    } else {
                        params = serde_json::json!({ "reminder_job_id": job.id });
                    }
                }
                let job = JobMessage::action(
                    &action.action_name,
                    *subject_id,
                    Some(rule.id),
                    params,
                )
                .with_correlation_id(&format!("run-{}", message.run_id));
                self.message_queue
                    .publish_message(&self.job_queue_name, &job)
                    .await
                    .map_err(|e| format!("派发动作作业失败: {e}"))?;
                dispatched += 1;
            }
        }

        let details = serde_json::json!({ "matched": matched, "dispatched": dispatched });
        self.run_repo
            .update_status(message.run_id, RunStatus::Success, Some(&details))
            .await
            .map_err(|e| format!("标记运行为Success失败: {e}"))?;

        info!(
            "规则 {} ({}) 运行 {} 完成: matched={matched}, dispatched={dispatched}",
            rule.id, rule.name, message.run_id
        );
        Ok(ExecutionOutcome::Ok)
    }

    /// `DailyPerSubjectField` 调度的逐主体分钟细化；
    /// 其余调度类型原样返回解析结果
    async fn refine_per_subject_minute(
        &self,
        rule: &Rule,
        subject_ids: Vec<i64>,
    ) -> Result<Vec<i64>, String> {
        let ScheduleSpec::DailyPerSubjectField { fallback_time, .. } = &rule.schedule else {
            return Ok(subject_ids);
        };

        let now = Utc::now();
        let mut kept = Vec::with_capacity(subject_ids.len());
        for subject_id in subject_ids {
            let subject = self
                .subject_source
                .get_subject(subject_id)
                .await
                .map_err(|e| format!("读取主体 {subject_id} 失败: {e}"))?;
            // 解析后消失的主体静默丢弃
            let Some(subject) = subject else {
                continue;
            };
            if subject_minute_matches(
                subject.preferred_time.as_deref(),
                fallback_time,
                now,
                self.timezone,
            ) {
                kept.push(subject_id);
            } else {
                debug!("主体 {subject_id} 的时刻不匹配当前分钟，丢弃");
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::models::{ActionSpec, Condition, JobPayload};
    use ruleflow_core::ScheduledJobRun;
    use ruleflow_domain::predicates::PredicateRegistry;
    use ruleflow_testing_utils::{
        MockMessageQueue, MockReminderRepository, MockRuleRepository, MockRunRepository,
        MockSubjectSource, RuleBuilder, SubjectBuilder,
    };

    const IST: Tz = chrono_tz::Asia::Kolkata;

    struct Fixture {
        runner: RuleRunner,
        run_repo: Arc<MockRunRepository>,
        reminder_repo: Arc<MockReminderRepository>,
        queue: Arc<MockMessageQueue>,
    }

    async fn fixture(rules: Vec<Rule>, source: Arc<MockSubjectSource>) -> (Fixture, i64) {
        let rule_repo = Arc::new(MockRuleRepository::with_rules(rules));
        let run_repo = Arc::new(MockRunRepository::new());
        let reminder_repo = Arc::new(MockReminderRepository::new());
        let queue = Arc::new(MockMessageQueue::new());
        let run = run_repo
            .create(&ScheduledJobRun::new(1, Utc::now()))
            .await
            .unwrap();

        let runner = RuleRunner::new(
            rule_repo,
            run_repo.clone(),
            reminder_repo.clone(),
            Arc::new(RuleResolver::new(
                source.clone(),
                Arc::new(PredicateRegistry::with_builtins()),
                100,
            )),
            source,
            queue.clone(),
            "jobs".to_string(),
            IST,
        );
        (
            Fixture {
                runner,
                run_repo,
                reminder_repo,
                queue,
            },
            run.id,
        )
    }

    fn reminder_rule() -> Rule {
        RuleBuilder::new()
            .with_id(1)
            .with_name("broadcast")
            .with_action(ActionSpec::new("send_reminder", serde_json::json!({})))
            .build()
    }

    #[tokio::test]
    async fn test_fan_out_per_subject_per_action() {
        let source = Arc::new(MockSubjectSource::with_subjects(vec![
            SubjectBuilder::new(1).build(),
            SubjectBuilder::new(2).build(),
        ]));
        let mut rule = reminder_rule();
        rule.actions.push(ActionSpec::new("export_data", serde_json::json!({"days": 7})));
        let (fixture, run_id) = fixture(vec![rule], source).await;

        let outcome = fixture
            .runner
            .run(&RunRuleMessage { rule_id: 1, run_id })
            .await;
        assert!(outcome.is_ok());

        // 2主体 × 2动作 = 4条作业
        let jobs = fixture.queue.peek("jobs");
        assert_eq!(jobs.len(), 4);

        let run = fixture.run_repo.get_by_id(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.details["matched"], 2);
        assert_eq!(run.details["dispatched"], 4);
    }

    #[tokio::test]
    async fn test_missing_rule_is_silent_noop() {
        let source = Arc::new(MockSubjectSource::new());
        let (fixture, run_id) = fixture(vec![], source).await;

        let outcome = fixture
            .runner
            .run(&RunRuleMessage {
                rule_id: 404,
                run_id,
            })
            .await;
        assert!(outcome.is_ok());
        assert!(fixture.queue.peek("jobs").is_empty());
    }

    #[tokio::test]
    async fn test_conditions_filter_subjects() {
        let now = Utc::now();
        let source = Arc::new(MockSubjectSource::with_subjects(vec![
            SubjectBuilder::new(1)
                .with_last_activity(now - chrono::Duration::days(30))
                .build(),
            SubjectBuilder::new(2).with_last_activity(now).build(),
        ]));
        let mut rule = reminder_rule();
        rule.conditions.push(Condition {
            predicate_name: "not_visited_in_days".to_string(),
            params: serde_json::json!({"days": 7}),
        });
        let (fixture, run_id) = fixture(vec![rule], source).await;

        fixture
            .runner
            .run(&RunRuleMessage { rule_id: 1, run_id })
            .await;

        let jobs = fixture.queue.peek("jobs");
        assert_eq!(jobs.len(), 1);
        match &jobs[0].payload {
            JobPayload::Action(action) => {
                assert_eq!(action.subject_id, 1);
                // 提醒动作的投递记录由规则执行器预先建立
                assert!(action.params["reminder_job_id"].is_i64());
            }
            other => panic!("载荷类型不符: {other:?}"),
        }
        let reminder_jobs = fixture.reminder_repo.list_for_subject(1).await.unwrap();
        assert_eq!(reminder_jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_per_subject_minute_refinement() {
        let local = Utc::now().with_timezone(&IST);
        let current_minute = format!(
            "{:02}:{:02}",
            chrono::Timelike::hour(&local),
            chrono::Timelike::minute(&local)
        );

        let matching = SubjectBuilder::new(1)
            .with_preferred_time(&current_minute)
            .build();
        let non_matching = SubjectBuilder::new(2).with_preferred_time("00:00").build();
        let source = Arc::new(MockSubjectSource::with_subjects(vec![
            matching,
            non_matching,
        ]));

        let rule = RuleBuilder::new()
            .with_id(1)
            .with_name("per-subject")
            .with_schedule(ScheduleSpec::DailyPerSubjectField {
                field_name: "preferred_time".to_string(),
                fallback_time: "23:59".to_string(),
            })
            .with_action(ActionSpec::new("send_reminder", serde_json::json!({})))
            .build();
        let (fixture, run_id) = fixture(vec![rule], source).await;

        fixture
            .runner
            .run(&RunRuleMessage { rule_id: 1, run_id })
            .await;

        // 只有偏好时刻命中当前分钟的主体收到动作
        let jobs = fixture.queue.peek("jobs");
        assert_eq!(jobs.len(), 1);
        match &jobs[0].payload {
            JobPayload::Action(action) => assert_eq!(action.subject_id, 1),
            other => panic!("载荷类型不符: {other:?}"),
        }

        let run = fixture.run_repo.get_by_id(run_id).await.unwrap().unwrap();
        assert_eq!(run.details["matched"], 2);
        assert_eq!(run.details["dispatched"], 1);
    }

    #[tokio::test]
    async fn test_target_allowlist_prefilters() {
        let source = Arc::new(MockSubjectSource::with_subjects(vec![
            SubjectBuilder::new(1).build(),
            SubjectBuilder::new(2).build(),
            SubjectBuilder::new(3).build(),
        ]));
        let rule = RuleBuilder::new()
            .with_id(1)
            .with_name("targeted")
            .with_target(vec![2])
            .with_action(ActionSpec::new("send_reminder", serde_json::json!({})))
            .build();
        let (fixture, run_id) = fixture(vec![rule], source).await;

        fixture
            .runner
            .run(&RunRuleMessage { rule_id: 1, run_id })
            .await;

        let jobs = fixture.queue.peek("jobs");
        assert_eq!(jobs.len(), 1);
        match &jobs[0].payload {
            JobPayload::Action(action) => assert_eq!(action.subject_id, 2),
            other => panic!("载荷类型不符: {other:?}"),
        }
    }
}
