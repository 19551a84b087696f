use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 规则定义：调度 + 条件 + 动作，引擎的配置单元
///
/// 规则由外部管理界面创建和编辑，引擎只读消费。
/// `enabled=false` 的规则不会被轮询器评估。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub schedule: ScheduleSpec,
    /// 条件列表，全部满足（逻辑AND）的主体才会匹配；不支持OR分组
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionSpec>,
    /// 可选的主体ID白名单，在批量迭代前作为预过滤器
    pub target: Option<Vec<i64>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 规则是否采用按主体时间字段的细化调度
    pub fn is_per_subject_schedule(&self) -> bool {
        matches!(self.schedule, ScheduleSpec::DailyPerSubjectField { .. })
    }
}

/// 调度描述：每条规则恰好一个变体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// 每天在固定本地时刻触发（分钟精度）
    Daily { time: String },
    /// 每天按主体自身的时间字段触发；调度器总是报告"到期"，
    /// 实际的分钟匹配下沉到规则执行器逐主体比较
    DailyPerSubjectField {
        field_name: String,
        fallback_time: String,
    },
    /// 每月固定日期的固定本地时刻触发
    Monthly { day_of_month: u32, time: String },
    /// CRON表达式调度
    Cron { expression: String },
}

impl ScheduleSpec {
    /// 调度描述的简短标识，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleSpec::Daily { .. } => "daily",
            ScheduleSpec::DailyPerSubjectField { .. } => "daily_per_subject_field",
            ScheduleSpec::Monthly { .. } => "monthly",
            ScheduleSpec::Cron { .. } => "cron",
        }
    }
}

/// 条件：命名谓词 + 参数
///
/// 未知的谓词名会使该条件（进而该规则对该主体）评估为false（fail-closed），
/// 绝不会被静默跳过。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub predicate_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Condition {
    pub fn new(predicate_name: &str, params: serde_json::Value) -> Self {
        Self {
            predicate_name: predicate_name.to_string(),
            params,
        }
    }
}

/// 动作：命名执行器 + 参数，如 `send_reminder{channels:[...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ActionSpec {
    pub fn new(action_name: &str, params: serde_json::Value) -> Self {
        Self {
            action_name: action_name.to_string(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_spec_serde_roundtrip() {
        let spec = ScheduleSpec::Daily {
            time: "09:00".to_string(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "daily");
        assert_eq!(json["time"], "09:00");

        let parsed: ScheduleSpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_monthly_schedule_deserialization() {
        let json = serde_json::json!({
            "type": "monthly",
            "day_of_month": 1,
            "time": "02:00"
        });
        let parsed: ScheduleSpec = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed,
            ScheduleSpec::Monthly {
                day_of_month: 1,
                time: "02:00".to_string()
            }
        );
    }

    #[test]
    fn test_per_subject_schedule_detection() {
        let spec = ScheduleSpec::DailyPerSubjectField {
            field_name: "preferred_time".to_string(),
            fallback_time: "18:00".to_string(),
        };
        assert_eq!(spec.kind(), "daily_per_subject_field");
    }
}
