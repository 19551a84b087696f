use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 异步作业执行生命周期的持久化镜像
///
/// 以执行基座的任务ID为主键。首个观测到的信号到达时创建（get-or-create），
/// 后续信号更新，引擎从不删除（供审计/看板读取）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub status: TaskState,
    pub worker: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// 仅当 start_time 与 end_time 都存在时计算，单位秒，非负
    pub duration_seconds: Option<i64>,
    /// 0-100
    pub progress: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// 创建最小化记录，用于信号先于记录到达的防御性场景
    pub fn minimal(task_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: task_id.to_string(),
            name: name.to_string(),
            status: TaskState::Pending,
            worker: None,
            start_time: None,
            end_time: None,
            duration_seconds: None,
            progress: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "REVOKED")]
    Revoked,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failed | TaskState::Revoked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
            TaskState::Revoked => "REVOKED",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "RUNNING" => Ok(TaskState::Running),
            "SUCCESS" => Ok(TaskState::Success),
            "FAILED" => Ok(TaskState::Failed),
            "REVOKED" => Ok(TaskState::Revoked),
            _ => Err(format!("Invalid task state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 执行基座发出的四类生命周期信号
///
/// 投递顺序与去重均无保证，消费侧必须容忍乱序和重复。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    PreRun {
        task_id: String,
        name: String,
        worker: String,
    },
    PostRun {
        task_id: String,
    },
    Failure {
        task_id: String,
        error: String,
    },
    Revoked {
        task_id: String,
    },
}

impl LifecycleEvent {
    pub fn task_id(&self) -> &str {
        match self {
            LifecycleEvent::PreRun { task_id, .. }
            | LifecycleEvent::PostRun { task_id }
            | LifecycleEvent::Failure { task_id, .. }
            | LifecycleEvent::Revoked { task_id } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::PreRun { .. } => "pre_run",
            LifecycleEvent::PostRun { .. } => "post_run",
            LifecycleEvent::Failure { .. } => "failure",
            LifecycleEvent::Revoked { .. } => "revoked",
        }
    }
}
