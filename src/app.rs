use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use ruleflow_core::config::AppConfig;
use ruleflow_core::traits::{
    ChatNotifier, EmailNotifier, MessageQueue, ReminderRepository, RuleRepository, RunRepository,
    SubjectSource, TaskRecordRepository,
};
use ruleflow_dispatcher::{DispatcherService, LifecycleListener, ReminderPlanner, RulePoller};
use ruleflow_domain::{PredicateRegistry, RuleResolver};
use ruleflow_infrastructure::{
    install_metrics_exporter, DatabaseManager, InMemoryMessageQueue, LocalArtifactStore,
    MetricsCollector, SmtpEmailNotifier, SqliteReminderRepository, SqliteRuleRepository,
    SqliteRunRepository, SqliteSubjectSource, SqliteTaskRecordRepository, WebhookChatNotifier,
};
use ruleflow_worker::{
    ExportDataExecutor, GenerateReportExecutor, RuleRunner, SendReminderExecutor, WorkerOptions,
    WorkerService, WorkerServiceBuilder,
};
use tokio::sync::broadcast;
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 仅运行调度侧（规则轮询、提醒规划、生命周期监听）
    Dispatcher,
    /// 仅运行执行侧
    Worker,
    /// 单进程内运行全部组件
    All,
}

/// 主应用程序
///
/// 嵌入式部署：SQLite存储 + 进程内消息队列，
/// 调度侧与执行侧共享同一个队列实例。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    timezone: Tz,
    db: Arc<DatabaseManager>,
    message_queue: Arc<dyn MessageQueue>,
    rule_repo: Arc<dyn RuleRepository>,
    run_repo: Arc<dyn RunRepository>,
    reminder_repo: Arc<dyn ReminderRepository>,
    task_record_repo: Arc<dyn TaskRecordRepository>,
    subject_source: Arc<dyn SubjectSource>,
    metrics: Arc<MetricsCollector>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let timezone = config.poller.tz().context("解析调度时区失败")?;

        let db = Arc::new(
            DatabaseManager::new(&config.database.url, config.database.max_connections)
                .await
                .with_context(|| format!("连接数据库失败: {}", config.database.url))?,
        );
        info!("数据库连接成功: {}", config.database.url);

        let pool = db.pool();
        let rule_repo: Arc<dyn RuleRepository> = Arc::new(SqliteRuleRepository::new(pool.clone()));
        let run_repo: Arc<dyn RunRepository> = Arc::new(SqliteRunRepository::new(pool.clone()));
        let reminder_repo: Arc<dyn ReminderRepository> =
            Arc::new(SqliteReminderRepository::new(pool.clone()));
        let task_record_repo: Arc<dyn TaskRecordRepository> =
            Arc::new(SqliteTaskRecordRepository::new(pool.clone()));
        let subject_source: Arc<dyn SubjectSource> = Arc::new(SqliteSubjectSource::new(pool));

        let message_queue: Arc<dyn MessageQueue> = Arc::new(InMemoryMessageQueue::new());

        install_metrics_exporter(&config.observability).context("安装指标导出器失败")?;
        let metrics = Arc::new(MetricsCollector::new());

        Ok(Self {
            config,
            mode,
            timezone,
            db,
            message_queue,
            rule_repo,
            run_repo,
            reminder_repo,
            task_record_repo,
            subject_source,
            metrics,
        })
    }

    /// 运行应用程序，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await?,
            AppMode::Worker => self.run_worker(shutdown_rx).await?,
            AppMode::All => self.run_all_components(shutdown_rx).await?,
        }

        self.db.close().await;
        Ok(())
    }

    /// 运行调度侧
    async fn run_dispatcher(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动调度侧服务");

        let poller = Arc::new(RulePoller::new(
            Arc::clone(&self.rule_repo),
            Arc::clone(&self.run_repo),
            Arc::clone(&self.message_queue),
            self.config.queue.job_queue.clone(),
            self.timezone,
            Arc::clone(&self.metrics),
        ));

        let planner = Arc::new(ReminderPlanner::new(
            Arc::clone(&self.subject_source),
            Arc::clone(&self.reminder_repo),
            Arc::clone(&self.message_queue),
            self.config.queue.job_queue.clone(),
            self.config.reminder.clone(),
            self.timezone,
            self.config.poller.subject_batch_size,
            Arc::clone(&self.metrics),
        ));

        let lifecycle_listener = Arc::new(LifecycleListener::new(
            Arc::clone(&self.task_record_repo),
            Arc::clone(&self.message_queue),
            self.config.queue.lifecycle_queue.clone(),
            Arc::clone(&self.metrics),
        ));

        let mut service = DispatcherService::new(
            poller,
            planner,
            lifecycle_listener,
            self.config.poller.tick_interval_seconds,
        );
        service.start().await.context("启动调度侧服务失败")?;

        let _ = shutdown_rx.recv().await;
        info!("调度侧收到关闭信号");

        service.stop().await;
        info!("调度侧服务已停止");
        Ok(())
    }

    /// 运行执行侧
    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动执行侧服务: {}", self.config.worker.worker_id);

        let registry = Arc::new(PredicateRegistry::with_builtins());
        let resolver = Arc::new(RuleResolver::new(
            Arc::clone(&self.subject_source),
            registry,
            self.config.poller.subject_batch_size,
        ));

        let rule_runner = Arc::new(RuleRunner::new(
            Arc::clone(&self.rule_repo),
            Arc::clone(&self.run_repo),
            Arc::clone(&self.reminder_repo),
            resolver,
            Arc::clone(&self.subject_source),
            Arc::clone(&self.message_queue),
            self.config.queue.job_queue.clone(),
            self.timezone,
        ));

        let chat_notifier: Arc<dyn ChatNotifier> = Arc::new(
            WebhookChatNotifier::new(self.config.notifier.webhook_timeout_seconds)
                .context("创建webhook通知客户端失败")?,
        );
        let email_notifier: Arc<dyn EmailNotifier> = Arc::new(
            SmtpEmailNotifier::new(&self.config.notifier).context("创建SMTP通知客户端失败")?,
        );
        let artifact_store = Arc::new(LocalArtifactStore::new(
            &self.config.storage.root_dir,
            &self.config.storage.base_url,
        ));
        let signed_url_ttl = Duration::from_secs(self.config.storage.signed_url_ttl_seconds);

        let options = WorkerOptions {
            worker_id: self.config.worker.worker_id.clone(),
            job_queue_name: self.config.queue.job_queue.clone(),
            lifecycle_queue_name: self.config.queue.lifecycle_queue.clone(),
            max_concurrent_jobs: self.config.worker.max_concurrent_jobs,
            poll_interval_ms: self.config.worker.poll_interval_ms,
            job_timeout_seconds: self.config.worker.job_timeout_seconds,
            max_retries: self.config.queue.max_retries,
            retry_initial_backoff_ms: self.config.queue.retry_initial_backoff_ms,
        };

        let service = Arc::new(
            WorkerServiceBuilder::new(Arc::clone(&self.message_queue), rule_runner, options)
                .register_executor(Arc::new(SendReminderExecutor::new(
                    Arc::clone(&self.subject_source),
                    Arc::clone(&self.reminder_repo),
                    chat_notifier,
                    Arc::clone(&email_notifier),
                    Arc::clone(&self.metrics),
                )))
                .register_executor(Arc::new(GenerateReportExecutor::new(
                    Arc::clone(&self.subject_source),
                    Arc::clone(&artifact_store) as _,
                    Arc::clone(&email_notifier),
                    self.timezone,
                    signed_url_ttl,
                )))
                .register_executor(Arc::new(ExportDataExecutor::new(
                    Arc::clone(&self.subject_source),
                    artifact_store,
                    email_notifier,
                    signed_url_ttl,
                )))
                .metrics(Arc::clone(&self.metrics))
                .build(),
        );

        let run_handle = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                if let Err(e) = service.run().await {
                    error!("执行侧服务运行失败: {e}");
                }
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("执行侧收到关闭信号");

        service.stop();
        let _ = run_handle.await;

        info!("执行侧服务已停止");
        Ok(())
    }

    /// 单进程内运行全部组件
    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动全部组件");

        let mut handles = Vec::new();

        if self.config.poller.enabled {
            let app = self.clone_for_mode(AppMode::Dispatcher);
            let shutdown_rx = shutdown_rx.resubscribe();

            handles.push(tokio::spawn(async move {
                if let Err(e) = app.run_dispatcher(shutdown_rx).await {
                    error!("调度侧运行失败: {e}");
                }
            }));
        }

        if self.config.worker.enabled {
            let app = self.clone_for_mode(AppMode::Worker);
            let shutdown_rx = shutdown_rx.resubscribe();

            handles.push(tokio::spawn(async move {
                if let Err(e) = app.run_worker(shutdown_rx).await {
                    error!("执行侧运行失败: {e}");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("全部组件已停止");
        Ok(())
    }

    /// 为特定模式克隆应用实例，共享底层连接与队列
    fn clone_for_mode(&self, mode: AppMode) -> Self {
        Self {
            config: self.config.clone(),
            mode,
            timezone: self.timezone,
            db: Arc::clone(&self.db),
            message_queue: Arc::clone(&self.message_queue),
            rule_repo: Arc::clone(&self.rule_repo),
            run_repo: Arc::clone(&self.run_repo),
            reminder_repo: Arc::clone(&self.reminder_repo),
            task_record_repo: Arc::clone(&self.task_record_repo),
            subject_source: Arc::clone(&self.subject_source),
            metrics: Arc::clone(&self.metrics),
        }
    }
}
