use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use ruleflow_core::{
    models::{JobMessage, JobPayload},
    traits::{ExecutionOutcome, MessageQueue},
    EngineResult, LifecycleEvent,
};
use ruleflow_infrastructure::MetricsCollector;

use crate::executors::ExecutorRegistry;
use crate::rule_runner::RuleRunner;

/// 执行侧服务配置
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    pub job_queue_name: String,
    pub lifecycle_queue_name: String,
    pub max_concurrent_jobs: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_seconds: u64,
    pub max_retries: i32,
    pub retry_initial_backoff_ms: u64,
}

/// 执行侧服务
///
/// 消费作业队列，按载荷类型分发给规则执行器或动作执行器。
/// 每个作业以消息ID为执行标识，向生命周期队列发射
/// PreRun/PostRun/Failure/Revoked 信号；可重试失败在退避后
/// 以同一消息ID重新入队，后到的PreRun会把记录翻回Running。
pub struct WorkerService {
    worker_id: String,
    message_queue: Arc<dyn MessageQueue>,
    rule_runner: Arc<RuleRunner>,
    executors: Arc<ExecutorRegistry>,
    metrics: Arc<MetricsCollector>,
    options: WorkerOptions,
    concurrency: Arc<Semaphore>,
    /// 已撤销的任务ID：消费到对应作业时直接丢弃
    cancelled: Arc<RwLock<HashSet<String>>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// WorkerService 的装配器
pub struct WorkerServiceBuilder {
    message_queue: Arc<dyn MessageQueue>,
    rule_runner: Arc<RuleRunner>,
    executors: ExecutorRegistry,
    metrics: Arc<MetricsCollector>,
    options: WorkerOptions,
}

impl WorkerServiceBuilder {
    pub fn new(
        message_queue: Arc<dyn MessageQueue>,
        rule_runner: Arc<RuleRunner>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            message_queue,
            rule_runner,
            executors: ExecutorRegistry::new(),
            metrics: Arc::new(MetricsCollector::new()),
            options,
        }
    }

    pub fn register_executor(
        mut self,
        executor: Arc<dyn ruleflow_core::traits::ActionExecutor>,
    ) -> Self {
        self.executors.register(executor);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> WorkerService {
        let (shutdown_tx, _) = broadcast::channel(1);
        WorkerService {
            worker_id: self.options.worker_id.clone(),
            message_queue: self.message_queue,
            rule_runner: self.rule_runner,
            executors: Arc::new(self.executors),
            metrics: self.metrics,
            concurrency: Arc::new(Semaphore::new(self.options.max_concurrent_jobs.max(1))),
            cancelled: Arc::new(RwLock::new(HashSet::new())),
            options: self.options,
            shutdown_tx,
        }
    }
}

impl WorkerService {
    /// 消费循环，直到收到停止信号
    pub async fn run(self: Arc<Self>) -> EngineResult<()> {
        info!(
            "执行服务 {} 启动, 支持动作: {:?}",
            self.worker_id,
            self.executors.names()
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("执行服务 {} 收到停止信号", self.worker_id);
                    break;
                }
                result = self.message_queue.consume_messages(&self.options.job_queue_name) => {
                    match result {
                        Ok(messages) => {
                            if messages.is_empty() {
                                tokio::time::sleep(Duration::from_millis(
                                    self.options.poll_interval_ms,
                                ))
                                .await;
                                continue;
                            }
                            for message in messages {
                                self.clone().dispatch(message).await;
                            }
                        }
                        Err(e) => {
                            error!("消费作业队列出错: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// 按载荷类型分发单条消息；作业类消息在并发许可下异步执行
    async fn dispatch(self: Arc<Self>, message: JobMessage) {
        match &message.payload {
            JobPayload::Cancel(cancel) => {
                self.handle_cancel(cancel.task_id.clone()).await;
            }
            JobPayload::Lifecycle(_) => {
                warn!("作业队列上出现生命周期消息 {}，忽略", message.id);
            }
            JobPayload::RunRule(_) | JobPayload::Action(_) => {
                if self.cancelled.write().await.remove(&message.id) {
                    info!("作业 {} 已被撤销，丢弃", message.id);
                    return;
                }

                let permit = match self.concurrency.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let service = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    service.execute_job(message).await;
                });
            }
        }
    }

    /// 撤销：记入撤销集并立即发射Revoked信号（粘性终态）
    async fn handle_cancel(&self, task_id: String) {
        info!("收到撤销请求: {task_id}");
        self.cancelled.write().await.insert(task_id.clone());
        self.emit(LifecycleEvent::Revoked { task_id }).await;
    }

    /// 执行单个作业：全生命周期信号 + 超时 + 退避重试
    async fn execute_job(&self, mut message: JobMessage) {
        let task_id = message.id.clone();
        let job_name = message.job_name();
        let start = std::time::Instant::now();

        self.emit(LifecycleEvent::PreRun {
            task_id: task_id.clone(),
            name: job_name.clone(),
            worker: self.worker_id.clone(),
        })
        .await;

        let timeout = Duration::from_secs(self.options.job_timeout_seconds);
        let outcome = tokio::select! {
            outcome = self.run_payload(&message) => outcome,
            _ = tokio::time::sleep(timeout) => {
                warn!("作业 {task_id} ({job_name}) 执行超时 ({}s)", timeout.as_secs());
                ExecutionOutcome::RetryableError(format!(
                    "执行超时 ({}s)",
                    timeout.as_secs()
                ))
            }
        };
        self.metrics
            .record_job_execution(start.elapsed().as_secs_f64());

        match outcome {
            ExecutionOutcome::Ok => {
                debug!("作业 {task_id} ({job_name}) 执行成功");
                self.emit(LifecycleEvent::PostRun { task_id }).await;
            }
            ExecutionOutcome::FatalError(error) => {
                self.metrics.record_job_failure(&job_name, &error);
                self.emit(LifecycleEvent::Failure {
                    task_id,
                    error,
                })
                .await;
            }
            ExecutionOutcome::RetryableError(error) => {
                self.metrics.record_job_failure(&job_name, &error);
                self.emit(LifecycleEvent::Failure {
                    task_id: task_id.clone(),
                    error: error.clone(),
                })
                .await;

                if message.retry_count < self.options.max_retries {
                    message.increment_retry();
                    self.metrics
                        .record_job_retry(&job_name, message.retry_count);
                    // 指数退避：100ms * 2^n, 加抖动避免重试风暴
                    let base = self.options.retry_initial_backoff_ms
                        << (message.retry_count - 1).min(16);
                    let jitter = rand::rng().random_range(0..=base / 4);
                    let backoff = Duration::from_millis(base + jitter);
                    warn!(
                        "作业 {task_id} ({job_name}) 可重试失败, 第 {} 次重试将在 {:?} 后: {error}",
                        message.retry_count, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    if let Err(e) = self
                        .message_queue
                        .publish_message(&self.options.job_queue_name, &message)
                        .await
                    {
                        error!("作业 {task_id} 重新入队失败: {e}");
                    }
                } else {
                    error!(
                        "作业 {task_id} ({job_name}) 重试预算耗尽 ({} 次), 终结: {error}",
                        self.options.max_retries
                    );
                }
            }
        }
    }

    async fn run_payload(&self, message: &JobMessage) -> ExecutionOutcome {
        match &message.payload {
            JobPayload::RunRule(run_rule) => self.rule_runner.run(run_rule).await,
            JobPayload::Action(action) => match self.executors.get(&action.action_name) {
                Some(executor) => executor.execute(action).await,
                None => {
                    ExecutionOutcome::FatalError(format!("未注册的动作: {}", action.action_name))
                }
            },
            // dispatch 已拦截其余载荷类型
            _ => ExecutionOutcome::Ok,
        }
    }

    async fn emit(&self, event: LifecycleEvent) {
        let message = JobMessage::lifecycle(event);
        if let Err(e) = self
            .message_queue
            .publish_message(&self.options.lifecycle_queue_name, &message)
            .await
        {
            error!("发射生命周期信号失败: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono_tz::Tz;
    use ruleflow_core::models::ActionMessage;
    use ruleflow_core::traits::ActionExecutor;
    use ruleflow_domain::predicates::PredicateRegistry;
    use ruleflow_domain::resolver::RuleResolver;
    use ruleflow_testing_utils::{
        MockMessageQueue, MockReminderRepository, MockRuleRepository, MockRunRepository,
        MockSubjectSource,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const IST: Tz = chrono_tz::Asia::Kolkata;

    /// 前N次调用返回可重试失败，之后成功
    struct FlakyExecutor {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _action: &ActionMessage) -> ExecutionOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                ExecutionOutcome::RetryableError("瞬时失败".to_string())
            } else {
                ExecutionOutcome::Ok
            }
        }
    }

    struct FatalExecutor;

    #[async_trait]
    impl ActionExecutor for FatalExecutor {
        fn name(&self) -> &str {
            "fatal"
        }

        async fn execute(&self, _action: &ActionMessage) -> ExecutionOutcome {
            ExecutionOutcome::FatalError("配置损坏".to_string())
        }
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            worker_id: "test-worker".to_string(),
            job_queue_name: "jobs".to_string(),
            lifecycle_queue_name: "lifecycle_events".to_string(),
            max_concurrent_jobs: 4,
            poll_interval_ms: 10,
            job_timeout_seconds: 5,
            max_retries: 3,
            retry_initial_backoff_ms: 1,
        }
    }

    fn service_with(
        queue: Arc<MockMessageQueue>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Arc<WorkerService> {
        let rule_runner = Arc::new(RuleRunner::new(
            Arc::new(MockRuleRepository::new()),
            Arc::new(MockRunRepository::new()),
            Arc::new(MockReminderRepository::new()),
            Arc::new(RuleResolver::new(
                Arc::new(MockSubjectSource::new()),
                Arc::new(PredicateRegistry::with_builtins()),
                100,
            )),
            Arc::new(MockSubjectSource::new()),
            queue.clone(),
            "jobs".to_string(),
            IST,
        ));
        Arc::new(
            WorkerServiceBuilder::new(queue, rule_runner, options())
                .register_executor(executor)
                .build(),
        )
    }

    fn lifecycle_kinds(queue: &MockMessageQueue) -> Vec<String> {
        queue
            .peek("lifecycle_events")
            .into_iter()
            .filter_map(|m| match m.payload {
                JobPayload::Lifecycle(event) => Some(event.kind().to_string()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_successful_job_emits_prerun_and_postrun() {
        let queue = Arc::new(MockMessageQueue::new());
        let service = service_with(
            queue.clone(),
            Arc::new(FlakyExecutor {
                calls: AtomicUsize::new(0),
                fail_times: 0,
            }),
        );

        let message = JobMessage::action("flaky", 1, None, serde_json::json!({}));
        service.execute_job(message).await;

        assert_eq!(lifecycle_kinds(&queue), vec!["pre_run", "post_run"]);
        // 成功的作业不重新入队
        assert!(queue.peek("jobs").is_empty());
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues_with_same_id() {
        let queue = Arc::new(MockMessageQueue::new());
        let service = service_with(
            queue.clone(),
            Arc::new(FlakyExecutor {
                calls: AtomicUsize::new(0),
                fail_times: 10,
            }),
        );

        let message = JobMessage::action("flaky", 1, None, serde_json::json!({}));
        let original_id = message.id.clone();
        service.execute_job(message).await;

        assert_eq!(lifecycle_kinds(&queue), vec!["pre_run", "failure"]);
        let requeued = queue.peek("jobs");
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].id, original_id);
        assert_eq!(requeued[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_never_requeues() {
        let queue = Arc::new(MockMessageQueue::new());
        let service = service_with(queue.clone(), Arc::new(FatalExecutor));

        let message = JobMessage::action("fatal", 1, None, serde_json::json!({}));
        service.execute_job(message).await;

        assert_eq!(lifecycle_kinds(&queue), vec!["pre_run", "failure"]);
        assert!(queue.peek("jobs").is_empty());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_terminates() {
        let queue = Arc::new(MockMessageQueue::new());
        let service = service_with(
            queue.clone(),
            Arc::new(FlakyExecutor {
                calls: AtomicUsize::new(0),
                fail_times: 10,
            }),
        );

        let mut message = JobMessage::action("flaky", 1, None, serde_json::json!({}));
        message.retry_count = 3;
        service.execute_job(message).await;

        assert!(queue.peek("jobs").is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_action_is_fatal() {
        let queue = Arc::new(MockMessageQueue::new());
        let service = service_with(queue.clone(), Arc::new(FatalExecutor));

        let message = JobMessage::action("does_not_exist", 1, None, serde_json::json!({}));
        service.execute_job(message).await;

        assert_eq!(lifecycle_kinds(&queue), vec!["pre_run", "failure"]);
        assert!(queue.peek("jobs").is_empty());
    }

    #[tokio::test]
    async fn test_cancel_marks_and_emits_revoked() {
        let queue = Arc::new(MockMessageQueue::new());
        let service = service_with(queue.clone(), Arc::new(FatalExecutor));

        let job = JobMessage::action("fatal", 1, None, serde_json::json!({}));
        service.handle_cancel(job.id.clone()).await;
        assert_eq!(lifecycle_kinds(&queue), vec!["revoked"]);

        // 随后消费到同ID作业时直接丢弃，不再发射任何信号
        service.clone().dispatch(job).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lifecycle_kinds(&queue), vec!["revoked"]);
    }
}
