//! 基础设施层：SQLite存储、内存消息队列、通知渠道、制品存储与可观测性

pub mod database;
pub mod in_memory_queue;
pub mod notify;
pub mod observability;
pub mod storage;

pub use database::sqlite::{
    SqliteReminderRepository, SqliteRuleRepository, SqliteRunRepository, SqliteSubjectSource,
    SqliteTaskRecordRepository,
};
pub use database::DatabaseManager;
pub use in_memory_queue::InMemoryMessageQueue;
pub use notify::{SmtpEmailNotifier, WebhookChatNotifier};
pub use observability::{install_metrics_exporter, MetricsCollector};
pub use storage::LocalArtifactStore;
