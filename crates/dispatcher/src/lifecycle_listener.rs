use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use ruleflow_core::{
    models::{JobMessage, JobPayload},
    traits::{MessageQueue, TaskRecordRepository},
    EngineResult, LifecycleEvent,
};
use ruleflow_domain::lifecycle::apply_event;
use ruleflow_infrastructure::MetricsCollector;

/// 生命周期监听器
///
/// 消费生命周期信号队列，经归约器折叠后写入 TaskRecord 存储。
/// 信号到达顺序没有保证，归约器负责乱序与重复信号的收敛。
pub struct LifecycleListener {
    task_record_repo: Arc<dyn TaskRecordRepository>,
    message_queue: Arc<dyn MessageQueue>,
    lifecycle_queue_name: String,
    metrics: Arc<MetricsCollector>,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl LifecycleListener {
    pub fn new(
        task_record_repo: Arc<dyn TaskRecordRepository>,
        message_queue: Arc<dyn MessageQueue>,
        lifecycle_queue_name: String,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_record_repo,
            message_queue,
            lifecycle_queue_name,
            metrics,
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("生命周期监听器停止信号已发送");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 监听循环：空队列短暂休眠，消费出错退避1秒后继续
    pub async fn listen(&self) -> EngineResult<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        info!("开始监听生命周期队列: {}", self.lifecycle_queue_name);

        loop {
            if !self.is_running().await {
                info!("收到停止信号，退出生命周期监听");
                break;
            }

            match self
                .message_queue
                .consume_messages(&self.lifecycle_queue_name)
                .await
            {
                Ok(messages) => {
                    if let Ok(depth) = self
                        .message_queue
                        .get_queue_size(&self.lifecycle_queue_name)
                        .await
                    {
                        self.metrics.update_lifecycle_queue_depth(depth as f64);
                    }
                    if messages.is_empty() {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                    for message in messages {
                        if let Err(e) = self.process_message(&message).await {
                            error!("处理生命周期消息 {} 出错: {e}", message.id);
                        }
                    }
                }
                Err(e) => {
                    error!("消费生命周期队列出错: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Ok(())
    }

    async fn process_message(&self, message: &JobMessage) -> EngineResult<()> {
        let JobPayload::Lifecycle(event) = &message.payload else {
            warn!("生命周期队列上出现非生命周期消息: {}", message.job_name());
            return Ok(());
        };
        self.apply(event).await
    }

    /// 将单个生命周期信号折叠进 TaskRecord
    pub async fn apply(&self, event: &LifecycleEvent) -> EngineResult<()> {
        let current = self.task_record_repo.get_by_id(event.task_id()).await?;
        let updated = apply_event(current, event, Utc::now());
        self.task_record_repo.upsert(&updated).await?;
        debug!(
            "任务 {} 的生命周期信号 {} 已折叠, 状态={:?}",
            event.task_id(),
            event.kind(),
            updated.status
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::TaskState;
    use ruleflow_testing_utils::{MockMessageQueue, MockTaskRecordRepository};

    fn listener() -> (LifecycleListener, Arc<MockTaskRecordRepository>) {
        let repo = Arc::new(MockTaskRecordRepository::new());
        let listener = LifecycleListener::new(
            repo.clone(),
            Arc::new(MockMessageQueue::new()),
            "lifecycle_events".to_string(),
            Arc::new(MetricsCollector::new()),
        );
        (listener, repo)
    }

    #[tokio::test]
    async fn test_prerun_then_postrun_is_success() {
        let (listener, repo) = listener();

        listener
            .apply(&LifecycleEvent::PreRun {
                task_id: "t1".to_string(),
                name: "run_rule:1".to_string(),
                worker: "w1".to_string(),
            })
            .await
            .unwrap();
        listener
            .apply(&LifecycleEvent::PostRun {
                task_id: "t1".to_string(),
            })
            .await
            .unwrap();

        let records = repo.all_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TaskState::Success);
        assert_eq!(records[0].progress, 100);
        assert!(records[0].duration_seconds.is_some());
    }

    #[tokio::test]
    async fn test_out_of_order_signal_creates_record() {
        let (listener, repo) = listener();

        // PostRun先于PreRun到达：防御性创建而非报错
        listener
            .apply(&LifecycleEvent::PostRun {
                task_id: "t2".to_string(),
            })
            .await
            .unwrap();

        let records = repo.all_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TaskState::Success);
        assert!(records[0].duration_seconds.is_none());
    }

    #[tokio::test]
    async fn test_revoked_is_sticky() {
        let (listener, repo) = listener();

        listener
            .apply(&LifecycleEvent::Revoked {
                task_id: "t3".to_string(),
            })
            .await
            .unwrap();
        listener
            .apply(&LifecycleEvent::PostRun {
                task_id: "t3".to_string(),
            })
            .await
            .unwrap();

        let records = repo.all_records();
        assert_eq!(records[0].status, TaskState::Revoked);
    }

    #[tokio::test]
    async fn test_non_lifecycle_message_is_ignored() {
        let (listener, repo) = listener();
        let message = JobMessage::run_rule(1, 1);
        listener.process_message(&message).await.unwrap();
        assert_eq!(repo.count(), 0);
    }
}
