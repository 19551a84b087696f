use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use ruleflow_core::{
    models::{ReminderJob, ReminderStatus},
    traits::ReminderRepository,
    EngineError, EngineResult,
};

pub struct SqliteReminderRepository {
    pool: SqlitePool,
}

impl SqliteReminderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> EngineResult<ReminderJob> {
        Ok(ReminderJob {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            status: row.try_get("status")?,
            sent_at: row.try_get("sent_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn set_status(
        &self,
        id: i64,
        status: ReminderStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE reminder_jobs SET status = $2, sent_at = COALESCE($3, sent_at) WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ReminderJobNotFound { id });
        }
        Ok(())
    }
}

#[async_trait]
impl ReminderRepository for SqliteReminderRepository {
    /// 幂等创建：`(subject_id, scheduled_at)` 上的唯一约束保证
    /// 同一槽位重复创建只会留下一条记录
    #[instrument(skip(self))]
    async fn upsert_slot(
        &self,
        subject_id: i64,
        scheduled_at: DateTime<Utc>,
    ) -> EngineResult<ReminderJob> {
        sqlx::query(
            r#"
            INSERT INTO reminder_jobs (subject_id, scheduled_at, status, created_at)
            VALUES ($1, $2, 'PENDING', $3)
            ON CONFLICT(subject_id, scheduled_at) DO NOTHING
            "#,
        )
        .bind(subject_id)
        .bind(scheduled_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        let row = sqlx::query(
            "SELECT id, subject_id, scheduled_at, status, sent_at, created_at
             FROM reminder_jobs WHERE subject_id = $1 AND scheduled_at = $2",
        )
        .bind(subject_id)
        .bind(scheduled_at)
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        Self::row_to_job(&row)
    }

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<ReminderJob>> {
        let row = sqlx::query(
            "SELECT id, subject_id, scheduled_at, status, sent_at, created_at
             FROM reminder_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> EngineResult<()> {
        self.set_status(id, ReminderStatus::Sent, Some(sent_at)).await
    }

    async fn mark_failed(&self, id: i64) -> EngineResult<()> {
        self.set_status(id, ReminderStatus::Failed, None).await
    }

    async fn mark_skipped(&self, id: i64) -> EngineResult<()> {
        self.set_status(id, ReminderStatus::Skipped, None).await
    }

    async fn list_for_subject(&self, subject_id: i64) -> EngineResult<Vec<ReminderJob>> {
        let rows = sqlx::query(
            "SELECT id, subject_id, scheduled_at, status, sent_at, created_at
             FROM reminder_jobs WHERE subject_id = $1 ORDER BY scheduled_at DESC",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn count_pending(&self) -> EngineResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM reminder_jobs WHERE status = 'PENDING'")
            .fetch_one(&self.pool)
            .await
            .map_err(EngineError::Database)?;
        Ok(row.try_get("cnt")?)
    }
}
