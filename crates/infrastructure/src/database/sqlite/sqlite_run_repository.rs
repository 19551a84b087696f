use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use ruleflow_core::{
    models::{RunStatus, ScheduledJobRun},
    traits::{RunFilter, RunRepository},
    EngineError, EngineResult,
};

pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> EngineResult<ScheduledJobRun> {
        let details_raw: Option<String> = row.try_get("details")?;
        let details = match details_raw {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| EngineError::Serialization(format!("解析run details失败: {e}")))?,
            None => serde_json::Value::Null,
        };

        Ok(ScheduledJobRun {
            id: row.try_get("id")?,
            rule_id: row.try_get("rule_id")?,
            run_time: row.try_get("run_time")?,
            status: row.try_get("status")?,
            details,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    #[instrument(skip(self, run), fields(rule_id = %run.rule_id))]
    async fn create(&self, run: &ScheduledJobRun) -> EngineResult<ScheduledJobRun> {
        let details = if run.details.is_null() {
            None
        } else {
            Some(
                serde_json::to_string(&run.details)
                    .map_err(|e| EngineError::Serialization(e.to_string()))?,
            )
        };

        let row = sqlx::query(
            r#"
            INSERT INTO scheduled_job_runs (rule_id, run_time, status, details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, rule_id, run_time, status, details, created_at
            "#,
        )
        .bind(run.rule_id)
        .bind(run.run_time)
        .bind(run.status)
        .bind(details)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        Self::row_to_run(&row)
    }

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<ScheduledJobRun>> {
        let row = sqlx::query(
            "SELECT id, rule_id, run_time, status, details, created_at
             FROM scheduled_job_runs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: i64,
        status: RunStatus,
        details: Option<&serde_json::Value>,
    ) -> EngineResult<()> {
        let result = match details {
            Some(details) => {
                let raw = serde_json::to_string(details)
                    .map_err(|e| EngineError::Serialization(e.to_string()))?;
                sqlx::query(
                    "UPDATE scheduled_job_runs SET status = $2, details = $3 WHERE id = $1",
                )
                .bind(id)
                .bind(status)
                .bind(raw)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query("UPDATE scheduled_job_runs SET status = $2 WHERE id = $1")
                    .bind(id)
                    .bind(status)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(EngineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RunNotFound { id });
        }
        Ok(())
    }

    async fn list(&self, filter: &RunFilter) -> EngineResult<Vec<ScheduledJobRun>> {
        // 动态拼接过滤条件，参数按出现顺序绑定
        let mut sql = String::from(
            "SELECT id, rule_id, run_time, status, details, created_at
             FROM scheduled_job_runs WHERE 1=1",
        );
        if filter.rule_id.is_some() {
            sql.push_str(" AND rule_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND run_time >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND run_time < ?");
        }
        sql.push_str(" ORDER BY run_time DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(rule_id) = filter.rule_id {
            query = query.bind(rule_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
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

        rows.iter().map(Self::row_to_run).collect()
    }

    async fn exists_in_window(
        &self,
        rule_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as cnt FROM scheduled_job_runs
             WHERE rule_id = $1 AND run_time >= $2 AND run_time < $3",
        )
        .bind(rule_id)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }

    async fn count_by_status(&self, rule_id: i64) -> EngineResult<Vec<(RunStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) as cnt FROM scheduled_job_runs
             WHERE rule_id = $1 GROUP BY status",
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        rows.iter()
            .map(|row| {
                let status: RunStatus = row.try_get("status")?;
                let count: i64 = row.try_get("cnt")?;
                Ok((status, count))
            })
            .collect()
    }
}
