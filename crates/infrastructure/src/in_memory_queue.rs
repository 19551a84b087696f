use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use ruleflow_core::{models::JobMessage, traits::MessageQueue, EngineError, EngineResult};

/// 内存消息队列实现
///
/// 基于 Tokio channels 的进程内队列，适用于内嵌部署场景。
/// 队列按名称惰性创建；消息消费即确认。
#[derive(Debug, Default)]
pub struct InMemoryMessageQueue {
    queues: RwLock<HashMap<String, QueueChannels>>,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<JobMessage>,
    /// 接收端用 Mutex 包装，允许多个消费者轮流排空
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<JobMessage>>>,
    size: Arc<AtomicU32>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_or_create_queue(&self, queue: &str) {
        let mut queues = self.queues.write().await;
        if !queues.contains_key(queue) {
            debug!("创建队列: {queue}");
            let (sender, receiver) = mpsc::unbounded_channel();
            queues.insert(
                queue.to_string(),
                QueueChannels {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                    size: Arc::new(AtomicU32::new(0)),
                },
            );
        }
    }

    async fn get_receiver(
        &self,
        queue: &str,
    ) -> EngineResult<Arc<Mutex<mpsc::UnboundedReceiver<JobMessage>>>> {
        let queues = self.queues.read().await;
        queues
            .get(queue)
            .map(|channels| channels.receiver.clone())
            .ok_or_else(|| EngineError::MessageQueue(format!("队列不存在: {queue}")))
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &JobMessage) -> EngineResult<()> {
        self.get_or_create_queue(queue).await;

        let queues = self.queues.read().await;
        let channels = queues
            .get(queue)
            .ok_or_else(|| EngineError::MessageQueue(format!("队列不存在: {queue}")))?;

        channels
            .sender
            .send(message.clone())
            .map_err(|e| EngineError::MessageQueue(format!("消息发送失败 ({queue}): {e}")))?;
        channels.size.fetch_add(1, Ordering::Relaxed);

        debug!("消息 {} 已发布到队列 {queue}", message.id);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> EngineResult<Vec<JobMessage>> {
        self.get_or_create_queue(queue).await;

        let receiver = self.get_receiver(queue).await?;
        let mut messages = Vec::new();
        {
            let mut rx = receiver.lock().await;
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }

        if !messages.is_empty() {
            let queues = self.queues.read().await;
            if let Some(channels) = queues.get(queue) {
                channels
                    .size
                    .fetch_sub(messages.len() as u32, Ordering::Relaxed);
            }
            debug!("从队列 {queue} 消费了 {} 条消息", messages.len());
        }
        Ok(messages)
    }

    /// 内存队列消费即确认，仅记录日志
    async fn ack_message(&self, message_id: &str) -> EngineResult<()> {
        debug!("确认消息: {message_id}");
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> EngineResult<()> {
        if requeue {
            warn!("消息 {message_id} 要求重新入队，由调用方负责带退避重新发布");
        } else {
            debug!("丢弃消息: {message_id}");
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> EngineResult<()> {
        info!("创建队列 {queue} (durable: {durable})");
        self.get_or_create_queue(queue).await;
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> EngineResult<()> {
        let mut queues = self.queues.write().await;
        if queues.remove(queue).is_some() {
            info!("已删除队列: {queue}");
        } else {
            warn!("待删除的队列不存在: {queue}");
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> EngineResult<u32> {
        let queues = self.queues.read().await;
        queues
            .get(queue)
            .map(|channels| channels.size.load(Ordering::Relaxed))
            .ok_or_else(|| EngineError::MessageQueue(format!("队列不存在: {queue}")))
    }

    async fn purge_queue(&self, queue: &str) -> EngineResult<()> {
        let receiver = self.get_receiver(queue).await?;
        let mut purged = 0u32;
        {
            let mut rx = receiver.lock().await;
            while rx.try_recv().is_ok() {
                purged += 1;
            }
        }

        let queues = self.queues.read().await;
        if let Some(channels) = queues.get(queue) {
            channels.size.store(0, Ordering::Relaxed);
        }
        info!("已清空队列 {queue}，丢弃 {purged} 条消息");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::models::JobMessage;

    #[tokio::test]
    async fn test_publish_and_consume() {
        let queue = InMemoryMessageQueue::new();
        queue.create_queue("jobs", false).await.unwrap();

        let message = JobMessage::run_rule(1, 10);
        queue.publish_message("jobs", &message).await.unwrap();
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 1);

        let messages = queue.consume_messages("jobs").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, message.id);
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let queue = InMemoryMessageQueue::new();
        let m1 = JobMessage::run_rule(1, 10);
        let m2 = JobMessage::run_rule(2, 11);

        queue.publish_message("jobs", &m1).await.unwrap();
        queue.publish_message("lifecycle_events", &m2).await.unwrap();

        let jobs = queue.consume_messages("jobs").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, m1.id);

        let events = queue.consume_messages("lifecycle_events").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, m2.id);
    }

    #[tokio::test]
    async fn test_purge_queue() {
        let queue = InMemoryMessageQueue::new();
        for rule_id in 0..5 {
            queue
                .publish_message("jobs", &JobMessage::run_rule(rule_id, rule_id))
                .await
                .unwrap();
        }
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 5);

        queue.purge_queue("jobs").await.unwrap();
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 0);
        assert!(queue.consume_messages("jobs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_queue() {
        let queue = InMemoryMessageQueue::new();
        queue.create_queue("jobs", false).await.unwrap();
        queue.delete_queue("jobs").await.unwrap();
        assert!(queue.get_queue_size("jobs").await.is_err());
    }
}
