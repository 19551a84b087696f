use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ReminderJob, Rule, RunStatus, ScheduledJobRun, TaskRecord, TaskState,
};
use crate::EngineResult;

/// 规则配置存储
///
/// 规则由外部管理界面写入，引擎侧以读取为主；
/// `update_last_run` 是引擎唯一的写入点。
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, rule: &Rule) -> EngineResult<Rule>;

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<Rule>>;

    /// 获取所有启用的规则，供轮询器逐条评估
    async fn get_enabled(&self) -> EngineResult<Vec<Rule>>;

    async fn update(&self, rule: &Rule) -> EngineResult<()>;

    async fn update_last_run(&self, id: i64, last_run_at: DateTime<Utc>) -> EngineResult<()>;

    async fn delete(&self, id: i64) -> EngineResult<()>;
}

/// 审计运行记录的查询过滤器
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub rule_id: Option<i64>,
    pub status: Option<RunStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// ScheduledJobRun 审计存储
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create(&self, run: &ScheduledJobRun) -> EngineResult<ScheduledJobRun>;

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<ScheduledJobRun>>;

    async fn update_status(
        &self,
        id: i64,
        status: RunStatus,
        details: Option<&serde_json::Value>,
    ) -> EngineResult<()>;

    async fn list(&self, filter: &RunFilter) -> EngineResult<Vec<ScheduledJobRun>>;

    /// 指定规则在 `[from, until)` 时间窗内是否已存在运行记录，
    /// 供轮询器在同一分钟内去重
    async fn exists_in_window(
        &self,
        rule_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<bool>;

    /// 按状态统计指定规则的运行次数
    async fn count_by_status(&self, rule_id: i64) -> EngineResult<Vec<(RunStatus, i64)>>;
}

/// ReminderJob 投递存储
#[async_trait]
pub trait ReminderRepository: Send + Sync {
    /// 幂等创建：`(subject_id, scheduled_at)` 已存在时返回既有记录
    async fn upsert_slot(
        &self,
        subject_id: i64,
        scheduled_at: DateTime<Utc>,
    ) -> EngineResult<ReminderJob>;

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<ReminderJob>>;

    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> EngineResult<()>;

    async fn mark_failed(&self, id: i64) -> EngineResult<()>;

    async fn mark_skipped(&self, id: i64) -> EngineResult<()>;

    async fn list_for_subject(&self, subject_id: i64) -> EngineResult<Vec<ReminderJob>>;

    async fn count_pending(&self) -> EngineResult<i64>;
}

/// TaskRecord 的查询过滤器，供审计/看板读取
#[derive(Debug, Clone, Default)]
pub struct TaskRecordFilter {
    pub status: Option<TaskState>,
    pub name_pattern: Option<String>,
    pub worker: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// TaskRecord 执行生命周期存储
///
/// 所有写入都是 upsert：信号到达顺序相对记录创建没有保证。
#[async_trait]
pub trait TaskRecordRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> EngineResult<Option<TaskRecord>>;

    /// 写入完整记录；并发写同一ID时后到的信号胜出，
    /// 但已是 REVOKED 的记录不再被覆盖
    async fn upsert(&self, record: &TaskRecord) -> EngineResult<()>;

    async fn list(&self, filter: &TaskRecordFilter) -> EngineResult<Vec<TaskRecord>>;
}
