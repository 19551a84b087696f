use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use ruleflow_core::{EngineResult, Rule, SubjectSource};

use crate::predicates::PredicateRegistry;

/// 规则解析器：返回满足规则全部条件的主体ID列表
///
/// 主体群体按固定批大小有界迭代，避免一次性加载全量数据。
/// 输出顺序是匹配的插入顺序；若主体群体在解析期间被并发修改，
/// 顺序在多次运行间不保证稳定。
pub struct RuleResolver {
    subject_source: Arc<dyn SubjectSource>,
    registry: Arc<PredicateRegistry>,
    batch_size: i64,
}

impl RuleResolver {
    pub fn new(
        subject_source: Arc<dyn SubjectSource>,
        registry: Arc<PredicateRegistry>,
        batch_size: i64,
    ) -> Self {
        Self {
            subject_source,
            registry,
            batch_size: batch_size.max(1),
        }
    }

    /// 解析规则匹配的主体，单个主体的评估失败不会中断批次的其余部分
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, rule_name = %rule.name))]
    pub async fn resolve_subjects(
        &self,
        rule: &Rule,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<i64>> {
        // target白名单在批量迭代前作为预过滤器
        let allowlist: Option<HashSet<i64>> = rule
            .target
            .as_ref()
            .map(|ids| ids.iter().copied().collect());

        let mut matched = Vec::new();
        let mut offset = 0i64;

        loop {
            let batch = self
                .subject_source
                .list_subjects(offset, self.batch_size)
                .await?;
            let batch_len = batch.len() as i64;

            for subject in &batch {
                if let Some(allow) = &allowlist {
                    if !allow.contains(&subject.id) {
                        continue;
                    }
                }

                // 注册表内部fail-closed，这里的评估不会使批次中断
                if self.registry.matches_all(&rule.conditions, subject, now) {
                    matched.push(subject.id);
                }
            }

            if batch_len < self.batch_size {
                break;
            }
            offset += batch_len;
        }

        if matched.is_empty() {
            debug!("规则 {} 没有匹配到任何主体", rule.name);
        } else {
            debug!("规则 {} 匹配到 {} 个主体", rule.name, matched.len());
        }
        if allowlist.as_ref().is_some_and(|a| a.is_empty()) {
            warn!("规则 {} 的target白名单为空，不会匹配任何主体", rule.name);
        }

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ruleflow_core::{models::Subject, Condition, ScheduleSpec};
    use ruleflow_testing_utils::builders::{RuleBuilder, SubjectBuilder};
    use ruleflow_testing_utils::mocks::MockSubjectSource;

    fn resolver_with(subjects: Vec<Subject>, batch_size: i64) -> RuleResolver {
        RuleResolver::new(
            Arc::new(MockSubjectSource::with_subjects(subjects)),
            Arc::new(PredicateRegistry::with_builtins()),
            batch_size,
        )
    }

    fn inactive_rule(days: i64) -> ruleflow_core::Rule {
        RuleBuilder::new()
            .with_schedule(ScheduleSpec::Daily {
                time: "09:00".to_string(),
            })
            .with_condition(Condition::new(
                "not_visited_in_days",
                serde_json::json!({"days": days}),
            ))
            .build()
    }

    #[tokio::test]
    async fn test_resolves_matching_subjects_only() {
        let now = Utc::now();
        let subjects = vec![
            SubjectBuilder::new(1)
                .with_last_activity(now - Duration::days(10))
                .build(),
            SubjectBuilder::new(2)
                .with_last_activity(now - Duration::days(1))
                .build(),
            SubjectBuilder::new(3).build(), // 从未活动
        ];

        let resolver = resolver_with(subjects, 200);
        let matched = resolver
            .resolve_subjects(&inactive_rule(7), now)
            .await
            .unwrap();
        assert_eq!(matched, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_batched_iteration_covers_all_subjects() {
        let now = Utc::now();
        let subjects: Vec<Subject> = (1..=7)
            .map(|id| {
                SubjectBuilder::new(id)
                    .with_last_activity(now - Duration::days(30))
                    .build()
            })
            .collect();

        // 批大小2，需要4个批次才能遍历完
        let resolver = resolver_with(subjects, 2);
        let matched = resolver
            .resolve_subjects(&inactive_rule(7), now)
            .await
            .unwrap();
        assert_eq!(matched.len(), 7);
    }

    #[tokio::test]
    async fn test_target_allowlist_prefilter() {
        let now = Utc::now();
        let subjects: Vec<Subject> = (1..=5)
            .map(|id| {
                SubjectBuilder::new(id)
                    .with_last_activity(now - Duration::days(30))
                    .build()
            })
            .collect();

        let rule = RuleBuilder::new()
            .with_condition(Condition::new(
                "not_visited_in_days",
                serde_json::json!({"days": 7}),
            ))
            .with_target(vec![2, 4])
            .build();

        let resolver = resolver_with(subjects, 200);
        let matched = resolver.resolve_subjects(&rule, now).await.unwrap();
        assert_eq!(matched, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_unknown_predicate_matches_nothing() {
        let now = Utc::now();
        let subjects = vec![
            SubjectBuilder::new(1).build(),
            SubjectBuilder::new(2).build(),
        ];

        let rule = RuleBuilder::new()
            .with_condition(Condition::new("predicate_from_the_future", serde_json::json!({})))
            .build();

        let resolver = resolver_with(subjects, 200);
        let matched = resolver.resolve_subjects(&rule, now).await.unwrap();
        assert!(matched.is_empty());
    }
}
