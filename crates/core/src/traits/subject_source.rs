use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ActivityRecord, Subject};
use crate::EngineResult;

/// 主体数据源：只读查询接口
///
/// 引擎只读取谓词评估和调度所需的属性；唯一的写入点是
/// 发送成功后的最近提醒标记。
#[async_trait]
pub trait SubjectSource: Send + Sync {
    /// 按稳定顺序分页列出主体，供解析器有界批量迭代
    async fn list_subjects(&self, offset: i64, limit: i64) -> EngineResult<Vec<Subject>>;

    async fn get_subject(&self, id: i64) -> EngineResult<Option<Subject>>;

    /// 指定主体在时间窗内的活动记录
    async fn activities_between(
        &self,
        subject_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<Vec<ActivityRecord>>;

    /// 自指定时刻以来是否有新资源上线（时间型提醒的资格条件之一）
    async fn has_new_resources_since(&self, cutoff: DateTime<Utc>) -> EngineResult<bool>;

    /// 更新主体的最近提醒标记，仅在发送成功后调用
    async fn mark_reminder_sent(&self, subject_id: i64, at: DateTime<Utc>) -> EngineResult<()>;
}
