//! ruleflow-core：引擎内核
//!
//! 定义错误类型、配置、领域模型和各子系统之间的trait边界。
//! 所有依赖都通过构造函数显式注入，不存在进程级的全局上下文。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{EngineError, EngineResult};
pub use models::{
    ActionMessage, ActionSpec, ActivityRecord, CancelMessage, Condition, JobMessage, JobPayload,
    LifecycleEvent, ReminderJob, ReminderStatus, Rule, RunRuleMessage, RunStatus, ScheduleSpec,
    ScheduledJobRun, Subject, TaskRecord, TaskState,
};
pub use traits::{
    ActionExecutor, ArtifactStore, ChatNotifier, EmailAttachment, EmailNotifier, ExecutionOutcome,
    MessageQueue, ReminderRepository, RuleRepository, RunFilter, RunRepository, SubjectSource,
    TaskRecordFilter, TaskRecordRepository,
};
