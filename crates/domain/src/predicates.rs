use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use ruleflow_core::{models::Subject, Condition, EngineError, EngineResult};

/// 谓词函数：对单个主体评估一个命名条件
///
/// 返回 `Err` 表示谓词内部失败（如参数格式错误），注册表会将其
/// 按 fail-closed 处理为 `false`。
pub type PredicateFn =
    Box<dyn Fn(&Subject, &serde_json::Value, DateTime<Utc>) -> EngineResult<bool> + Send + Sync>;

/// 谓词注册表：字符串键到类型化处理器的显式映射，启动时构建一次
///
/// 条件只支持逻辑AND组合，没有OR分组——这是记录在案的限制而非缺陷。
pub struct PredicateRegistry {
    predicates: HashMap<String, PredicateFn>,
}

impl PredicateRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }

    /// 创建包含全部内置谓词的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("not_visited_in_days", Box::new(pred_not_visited_in_days));
        registry.register("has_activity_in_days", Box::new(pred_has_activity_in_days));
        registry.register("spent_more_than", Box::new(pred_spent_more_than));
        registry.register(
            "most_used_resource_in_period",
            Box::new(pred_most_used_resource_in_period),
        );
        registry
    }

    /// 注册谓词，同名覆盖
    pub fn register(&mut self, name: &str, predicate: PredicateFn) {
        self.predicates.insert(name.to_string(), predicate);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    /// 评估单个条件，总函数：未知谓词名和内部失败都按fail-closed处理为false
    pub fn evaluate(
        &self,
        condition: &Condition,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(predicate) = self.predicates.get(&condition.predicate_name) else {
            warn!(
                "未知的谓词名 '{}'，条件按false处理",
                condition.predicate_name
            );
            return false;
        };

        match predicate(subject, &condition.params, now) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    "谓词 '{}' 对主体 {} 评估失败，按false处理: {}",
                    condition.predicate_name, subject.id, e
                );
                false
            }
        }
    }

    /// 评估规则的全部条件（逻辑AND），任一不满足即为不匹配
    pub fn matches_all(
        &self,
        conditions: &[Condition],
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> bool {
        conditions
            .iter()
            .all(|condition| self.evaluate(condition, subject, now))
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn param_i64(params: &serde_json::Value, key: &str) -> EngineResult<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| EngineError::Internal(format!("谓词参数缺失或类型错误: {key}")))
}

fn param_f64(params: &serde_json::Value, key: &str) -> EngineResult<f64> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| EngineError::Internal(format!("谓词参数缺失或类型错误: {key}")))
}

/// `not_visited_in_days{days}`：最近活动时间为空或早于 `days` 天前
fn pred_not_visited_in_days(
    subject: &Subject,
    params: &serde_json::Value,
    now: DateTime<Utc>,
) -> EngineResult<bool> {
    let days = param_i64(params, "days")?;
    let cutoff = now - Duration::days(days);
    Ok(match subject.last_activity_at {
        None => true,
        Some(last) => last < cutoff,
    })
}

/// `has_activity_in_days{days}`：时间窗内存在至少一条活动记录
fn pred_has_activity_in_days(
    subject: &Subject,
    params: &serde_json::Value,
    now: DateTime<Utc>,
) -> EngineResult<bool> {
    let days = param_i64(params, "days")?;
    let cutoff = now - Duration::days(days);
    Ok(subject.activities.iter().any(|a| a.occurred_at >= cutoff))
}

/// `spent_more_than{amount, days?}`：可选时间窗内的金额合计超过 `amount`
fn pred_spent_more_than(
    subject: &Subject,
    params: &serde_json::Value,
    now: DateTime<Utc>,
) -> EngineResult<bool> {
    let amount = param_f64(params, "amount")?;
    let cutoff = match params.get("days") {
        Some(_) => Some(now - Duration::days(param_i64(params, "days")?)),
        None => None,
    };

    let total: f64 = subject
        .activities
        .iter()
        .filter(|a| cutoff.map_or(true, |c| a.occurred_at >= c))
        .map(|a| a.amount)
        .sum();

    Ok(total > amount)
}

/// `most_used_resource_in_period{days, min_count}`：
/// 时间窗内按资源分组后的最高使用次数 ≥ `min_count`
fn pred_most_used_resource_in_period(
    subject: &Subject,
    params: &serde_json::Value,
    now: DateTime<Utc>,
) -> EngineResult<bool> {
    let days = param_i64(params, "days")?;
    let min_count = param_i64(params, "min_count")?;
    let cutoff = now - Duration::days(days);

    let mut counts: HashMap<&str, i64> = HashMap::new();
    for activity in &subject.activities {
        if activity.occurred_at >= cutoff {
            *counts.entry(activity.resource_key.as_str()).or_insert(0) += 1;
        }
    }

    Ok(counts.values().max().copied().unwrap_or(0) >= min_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::models::ActivityRecord;

    fn subject_with_activities(
        last_activity: Option<DateTime<Utc>>,
        activities: Vec<ActivityRecord>,
    ) -> Subject {
        Subject {
            id: 1,
            name: "测试主体".to_string(),
            email: Some("subject@example.com".to_string()),
            webhook_url: None,
            receive_reminders: true,
            preferred_time: None,
            last_activity_at: last_activity,
            last_reminder_sent_at: None,
            activities,
        }
    }

    fn activity(days_ago: i64, amount: f64, resource: &str) -> ActivityRecord {
        ActivityRecord {
            occurred_at: Utc::now() - Duration::days(days_ago),
            amount,
            resource_key: resource.to_string(),
        }
    }

    #[test]
    fn test_not_visited_in_days() {
        let registry = PredicateRegistry::with_builtins();
        let now = Utc::now();
        let condition = Condition::new("not_visited_in_days", serde_json::json!({"days": 7}));

        let inactive = subject_with_activities(Some(now - Duration::days(10)), vec![]);
        assert!(registry.evaluate(&condition, &inactive, now));

        let active = subject_with_activities(Some(now - Duration::days(1)), vec![]);
        assert!(!registry.evaluate(&condition, &active, now));

        let never_seen = subject_with_activities(None, vec![]);
        assert!(registry.evaluate(&condition, &never_seen, now));
    }

    #[test]
    fn test_has_activity_in_days() {
        let registry = PredicateRegistry::with_builtins();
        let now = Utc::now();
        let condition = Condition::new("has_activity_in_days", serde_json::json!({"days": 7}));

        let recent = subject_with_activities(None, vec![activity(3, 50.0, "lot-a")]);
        assert!(registry.evaluate(&condition, &recent, now));

        let stale = subject_with_activities(None, vec![activity(30, 50.0, "lot-a")]);
        assert!(!registry.evaluate(&condition, &stale, now));
    }

    #[test]
    fn test_spent_more_than_with_window() {
        let registry = PredicateRegistry::with_builtins();
        let now = Utc::now();
        let subject = subject_with_activities(
            None,
            vec![
                activity(2, 60.0, "lot-a"),
                activity(3, 50.0, "lot-b"),
                activity(40, 500.0, "lot-a"),
            ],
        );

        // 窗口内 110 > 100
        let condition =
            Condition::new("spent_more_than", serde_json::json!({"amount": 100.0, "days": 7}));
        assert!(registry.evaluate(&condition, &subject, now));

        // 窗口内 110 < 200，窗口外的500不计入
        let condition =
            Condition::new("spent_more_than", serde_json::json!({"amount": 200.0, "days": 7}));
        assert!(!registry.evaluate(&condition, &subject, now));

        // 无窗口则全量计入
        let condition = Condition::new("spent_more_than", serde_json::json!({"amount": 200.0}));
        assert!(registry.evaluate(&condition, &subject, now));
    }

    #[test]
    fn test_most_used_resource_in_period() {
        let registry = PredicateRegistry::with_builtins();
        let now = Utc::now();
        let subject = subject_with_activities(
            None,
            vec![
                activity(1, 10.0, "lot-a"),
                activity(2, 10.0, "lot-a"),
                activity(3, 10.0, "lot-a"),
                activity(4, 10.0, "lot-b"),
            ],
        );

        let condition = Condition::new(
            "most_used_resource_in_period",
            serde_json::json!({"days": 7, "min_count": 3}),
        );
        assert!(registry.evaluate(&condition, &subject, now));

        let condition = Condition::new(
            "most_used_resource_in_period",
            serde_json::json!({"days": 7, "min_count": 4}),
        );
        assert!(!registry.evaluate(&condition, &subject, now));
    }

    #[test]
    fn test_unknown_predicate_fails_closed() {
        let registry = PredicateRegistry::with_builtins();
        let now = Utc::now();
        let subject = subject_with_activities(None, vec![]);

        let condition = Condition::new("no_such_predicate", serde_json::json!({}));
        assert!(!registry.evaluate(&condition, &subject, now));
    }

    #[test]
    fn test_malformed_params_fail_closed() {
        let registry = PredicateRegistry::with_builtins();
        let now = Utc::now();
        // 该主体本应匹配，但参数损坏必须评估为false
        let subject = subject_with_activities(None, vec![]);

        let condition =
            Condition::new("not_visited_in_days", serde_json::json!({"days": "七天"}));
        assert!(!registry.evaluate(&condition, &subject, now));
    }

    #[test]
    fn test_and_chain_semantics() {
        let registry = PredicateRegistry::with_builtins();
        let now = Utc::now();
        let subject = subject_with_activities(Some(now - Duration::days(10)), vec![]);

        let matching = Condition::new("not_visited_in_days", serde_json::json!({"days": 7}));
        let failing = Condition::new("has_activity_in_days", serde_json::json!({"days": 7}));

        assert!(registry.matches_all(&[matching.clone()], &subject, now));
        assert!(!registry.matches_all(&[matching, failing], &subject, now));
        // 空条件列表匹配一切
        assert!(registry.matches_all(&[], &subject, now));
    }
}
