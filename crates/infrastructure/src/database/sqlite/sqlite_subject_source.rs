use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use ruleflow_core::{
    models::{ActivityRecord, Subject},
    traits::SubjectSource,
    EngineError, EngineResult,
};

/// 快照随附的活动记录回溯窗口（天）
const ACTIVITY_WINDOW_DAYS: i64 = 90;

/// 主体数据在本地SQLite中的只读视图
pub struct SqliteSubjectSource {
    pool: SqlitePool,
}

impl SqliteSubjectSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_activities(
        &self,
        subject_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<Vec<ActivityRecord>> {
        let rows = sqlx::query(
            "SELECT occurred_at, amount, resource_key FROM subject_activities
             WHERE subject_id = $1 AND occurred_at >= $2 AND occurred_at < $3
             ORDER BY occurred_at",
        )
        .bind(subject_id)
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(ActivityRecord {
                    occurred_at: row.try_get("occurred_at")?,
                    amount: row.try_get("amount")?,
                    resource_key: row.try_get("resource_key")?,
                })
            })
            .collect()
    }

    async fn row_to_subject(&self, row: &sqlx::sqlite::SqliteRow) -> EngineResult<Subject> {
        let id: i64 = row.try_get("id")?;
        let now = Utc::now();
        let activities = self
            .load_activities(id, now - Duration::days(ACTIVITY_WINDOW_DAYS), now)
            .await?;

        Ok(Subject {
            id,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            webhook_url: row.try_get("webhook_url")?,
            receive_reminders: row.try_get("receive_reminders")?,
            preferred_time: row.try_get("preferred_time")?,
            last_activity_at: row.try_get("last_activity_at")?,
            last_reminder_sent_at: row.try_get("last_reminder_sent_at")?,
            activities,
        })
    }
}

#[async_trait]
impl SubjectSource for SqliteSubjectSource {
    async fn list_subjects(&self, offset: i64, limit: i64) -> EngineResult<Vec<Subject>> {
        let rows = sqlx::query(
            "SELECT id, name, email, webhook_url, receive_reminders, preferred_time,
                    last_activity_at, last_reminder_sent_at
             FROM subjects ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        let mut subjects = Vec::with_capacity(rows.len());
        for row in &rows {
            subjects.push(self.row_to_subject(row).await?);
        }
        Ok(subjects)
    }

    async fn get_subject(&self, id: i64) -> EngineResult<Option<Subject>> {
        let row = sqlx::query(
            "SELECT id, name, email, webhook_url, receive_reminders, preferred_time,
                    last_activity_at, last_reminder_sent_at
             FROM subjects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        match row {
            Some(row) => Ok(Some(self.row_to_subject(&row).await?)),
            None => Ok(None),
        }
    }

    async fn activities_between(
        &self,
        subject_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<Vec<ActivityRecord>> {
        self.load_activities(subject_id, from, until).await
    }

    async fn has_new_resources_since(&self, cutoff: DateTime<Utc>) -> EngineResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM resources WHERE created_at >= $1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
            .map_err(EngineError::Database)?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }

    async fn mark_reminder_sent(&self, subject_id: i64, at: DateTime<Utc>) -> EngineResult<()> {
        let result = sqlx::query("UPDATE subjects SET last_reminder_sent_at = $2 WHERE id = $1")
            .bind(subject_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(EngineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::SubjectSource(format!(
                "主体不存在: {subject_id}"
            )));
        }
        Ok(())
    }
}
