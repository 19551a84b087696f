use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LifecycleEvent;
use crate::{EngineError, EngineResult};

/// 队列消息信封
///
/// `id` 同时作为执行基座的任务标识：生命周期信号与 TaskRecord 都以它为键。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: String,
    pub payload: JobPayload,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
    pub correlation_id: Option<String>,
}

/// 队列消息载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// 执行一条规则的一次触发
    RunRule(RunRuleMessage),
    /// 对单个主体执行一个动作
    Action(ActionMessage),
    /// 执行生命周期信号（独立队列）
    Lifecycle(LifecycleEvent),
    /// 撤销一个已提交的作业
    Cancel(CancelMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRuleMessage {
    pub rule_id: i64,
    pub run_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMessage {
    pub action_name: String,
    pub subject_id: i64,
    pub rule_id: Option<i64>,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelMessage {
    pub task_id: String,
}

impl JobMessage {
    fn wrap(payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn run_rule(rule_id: i64, run_id: i64) -> Self {
        Self::wrap(JobPayload::RunRule(RunRuleMessage { rule_id, run_id }))
    }

    pub fn action(
        action_name: &str,
        subject_id: i64,
        rule_id: Option<i64>,
        params: serde_json::Value,
    ) -> Self {
        Self::wrap(JobPayload::Action(ActionMessage {
            action_name: action_name.to_string(),
            subject_id,
            rule_id,
            params,
        }))
    }

    pub fn lifecycle(event: LifecycleEvent) -> Self {
        Self::wrap(JobPayload::Lifecycle(event))
    }

    pub fn cancel(task_id: &str) -> Self {
        Self::wrap(JobPayload::Cancel(CancelMessage {
            task_id: task_id.to_string(),
        }))
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// 作业的可读名称，进入 TaskRecord.name
    pub fn job_name(&self) -> String {
        match &self.payload {
            JobPayload::RunRule(msg) => format!("run_rule:{}", msg.rule_id),
            JobPayload::Action(msg) => msg.action_name.clone(),
            JobPayload::Lifecycle(event) => format!("lifecycle:{}", event.kind()),
            JobPayload::Cancel(_) => "cancel".to_string(),
        }
    }

    pub fn serialize(&self) -> EngineResult<String> {
        serde_json::to_string(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    pub fn deserialize(data: &str) -> EngineResult<Self> {
        serde_json::from_str(data).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let message = JobMessage::run_rule(7, 21).with_correlation_id("run-21");
        let raw = message.serialize().unwrap();
        let parsed = JobMessage::deserialize(&raw).unwrap();

        assert_eq!(parsed.id, message.id);
        assert_eq!(parsed.correlation_id.as_deref(), Some("run-21"));
        match parsed.payload {
            JobPayload::RunRule(msg) => {
                assert_eq!(msg.rule_id, 7);
                assert_eq!(msg.run_id, 21);
            }
            _ => panic!("载荷类型不符"),
        }
    }

    #[test]
    fn test_retry_counter() {
        let mut message = JobMessage::action("send_reminder", 1, None, serde_json::json!({}));
        assert_eq!(message.retry_count, 0);
        message.increment_retry();
        message.increment_retry();
        assert_eq!(message.retry_count, 2);
    }

    #[test]
    fn test_job_name() {
        let message = JobMessage::action("generate_report", 5, Some(3), serde_json::json!({}));
        assert_eq!(message.job_name(), "generate_report");
    }
}
