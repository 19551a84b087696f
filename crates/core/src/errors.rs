use thiserror::Error;

/// 引擎错误类型定义
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("规则未找到: {id}")]
    RuleNotFound { id: i64 },

    #[error("调度运行记录未找到: {id}")]
    RunNotFound { id: i64 },

    #[error("提醒作业未找到: {id}")]
    ReminderJobNotFound { id: i64 },

    #[error("任务记录未找到: {id}")]
    TaskRecordNotFound { id: String },

    #[error("无效的调度描述: {expr} - {message}")]
    InvalidSchedule { expr: String, message: String },

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("通知发送错误: {0}")]
    Notification(String),

    #[error("制品存储错误: {0}")]
    Storage(String),

    #[error("主体数据源错误: {0}")]
    SubjectSource(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type EngineResult<T> = std::result::Result<T, EngineError>;
