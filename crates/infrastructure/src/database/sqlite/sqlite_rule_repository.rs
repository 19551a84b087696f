use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use ruleflow_core::{
    models::{ActionSpec, Condition, Rule, ScheduleSpec},
    traits::RuleRepository,
    EngineError, EngineResult,
};

pub struct SqliteRuleRepository {
    pool: SqlitePool,
}

impl SqliteRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Rule> {
        let schedule_raw: String = row.try_get("schedule")?;
        let conditions_raw: String = row.try_get("conditions")?;
        let actions_raw: String = row.try_get("actions")?;
        let target_raw: Option<String> = row.try_get("target")?;

        let schedule: ScheduleSpec = serde_json::from_str(&schedule_raw)
            .map_err(|e| EngineError::Serialization(format!("解析schedule失败: {e}")))?;
        let conditions: Vec<Condition> = serde_json::from_str(&conditions_raw)
            .map_err(|e| EngineError::Serialization(format!("解析conditions失败: {e}")))?;
        let actions: Vec<ActionSpec> = serde_json::from_str(&actions_raw)
            .map_err(|e| EngineError::Serialization(format!("解析actions失败: {e}")))?;
        let target: Option<Vec<i64>> = match target_raw {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| EngineError::Serialization(format!("解析target失败: {e}")))?,
            ),
            None => None,
        };

        Ok(Rule {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            enabled: row.try_get("enabled")?,
            schedule,
            conditions,
            actions,
            target,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn encode_json<T: serde::Serialize>(value: &T) -> EngineResult<String> {
        serde_json::to_string(value).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    #[instrument(skip(self, rule), fields(rule_name = %rule.name))]
    async fn create(&self, rule: &Rule) -> EngineResult<Rule> {
        let row = sqlx::query(
            r#"
            INSERT INTO rules (name, enabled, schedule, conditions, actions, target,
                               last_run_at, next_run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, name, enabled, schedule, conditions, actions, target,
                      last_run_at, next_run_at, created_at, updated_at
            "#,
        )
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(Self::encode_json(&rule.schedule)?)
        .bind(Self::encode_json(&rule.conditions)?)
        .bind(Self::encode_json(&rule.actions)?)
        .bind(match &rule.target {
            Some(target) => Some(Self::encode_json(target)?),
            None => None,
        })
        .bind(rule.last_run_at)
        .bind(rule.next_run_at)
        .bind(Utc::now())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        let created = Self::row_to_rule(&row)?;
        debug!("创建规则成功: {} (ID {})", created.name, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<Rule>> {
        let row = sqlx::query(
            "SELECT id, name, enabled, schedule, conditions, actions, target,
                    last_run_at, next_run_at, created_at, updated_at
             FROM rules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_rule(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_enabled(&self) -> EngineResult<Vec<Rule>> {
        let rows = sqlx::query(
            "SELECT id, name, enabled, schedule, conditions, actions, target,
                    last_run_at, next_run_at, created_at, updated_at
             FROM rules WHERE enabled = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn update(&self, rule: &Rule) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE rules
            SET name = $2, enabled = $3, schedule = $4, conditions = $5, actions = $6,
                target = $7, last_run_at = $8, next_run_at = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(Self::encode_json(&rule.schedule)?)
        .bind(Self::encode_json(&rule.conditions)?)
        .bind(Self::encode_json(&rule.actions)?)
        .bind(match &rule.target {
            Some(target) => Some(Self::encode_json(target)?),
            None => None,
        })
        .bind(rule.last_run_at)
        .bind(rule.next_run_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RuleNotFound { id: rule.id });
        }
        Ok(())
    }

    async fn update_last_run(&self, id: i64, last_run_at: DateTime<Utc>) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE rules SET last_run_at = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(last_run_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RuleNotFound { id });
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> EngineResult<()> {
        let result = sqlx::query("DELETE FROM rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(EngineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RuleNotFound { id });
        }
        debug!("删除规则成功: ID {id}");
        Ok(())
    }
}
