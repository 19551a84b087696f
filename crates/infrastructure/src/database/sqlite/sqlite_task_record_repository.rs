use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use ruleflow_core::{
    models::TaskRecord,
    traits::{TaskRecordFilter, TaskRecordRepository},
    EngineError, EngineResult,
};

pub struct SqliteTaskRecordRepository {
    pool: SqlitePool,
}

impl SqliteTaskRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> EngineResult<TaskRecord> {
        Ok(TaskRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            worker: row.try_get("worker")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            duration_seconds: row.try_get("duration_seconds")?,
            progress: row.try_get("progress")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRecordRepository for SqliteTaskRecordRepository {
    async fn get_by_id(&self, id: &str) -> EngineResult<Option<TaskRecord>> {
        let row = sqlx::query(
            "SELECT id, name, status, worker, start_time, end_time, duration_seconds,
                    progress, error_message, created_at, updated_at
             FROM task_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// 全量覆盖写入。冲突时已撤销的记录保持不变，
    /// 避免迟到的状态信号复活终态记录。
    #[instrument(skip(self, record), fields(task_id = %record.id, status = ?record.status))]
    async fn upsert(&self, record: &TaskRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_records
                (id, name, status, worker, start_time, end_time, duration_seconds,
                 progress, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                worker = excluded.worker,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                duration_seconds = excluded.duration_seconds,
                progress = excluded.progress,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            WHERE task_records.status != 'REVOKED'
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.status)
        .bind(&record.worker)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.duration_seconds)
        .bind(record.progress)
        .bind(&record.error_message)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        Ok(())
    }

    async fn list(&self, filter: &TaskRecordFilter) -> EngineResult<Vec<TaskRecord>> {
        let mut sql = String::from(
            "SELECT id, name, status, worker, start_time, end_time, duration_seconds,
                    progress, error_message, created_at, updated_at
             FROM task_records WHERE 1=1",
        );

        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.name_pattern.is_some() {
            sql.push_str(" AND name LIKE ?");
        }
        if filter.worker.is_some() {
            sql.push_str(" AND worker = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(pattern) = &filter.name_pattern {
            query = query.bind(format!("%{pattern}%"));
        }
        if let Some(worker) = &filter.worker {
            query = query.bind(worker.clone());
        }
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        if let Some(until) = filter.until {
            query = query.bind(until);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::Database)?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
