use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::warn;

use ruleflow_core::{EngineError, EngineResult, ScheduleSpec};

/// 轮询周期，分钟精度触发的判定窗口
pub const TICK_SECONDS: i64 = 60;

/// 解析 `"HH:MM"` 时刻字符串
pub fn parse_hhmm(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.splitn(2, ':');
    let hour = parts.next()?.parse::<u32>().ok().filter(|h| *h < 24)?;
    let minute = parts.next()?.parse::<u32>().ok().filter(|m| *m < 60)?;
    Some((hour, minute))
}

/// 调度评估：给定调度描述和当前时刻，判定规则是否"现在"到期
///
/// 纯函数、无状态、分钟精度，按配置时区换算本地时间。
/// 同一分钟内的重复触发去重是轮询器的职责（经由审计记录），不在这里。
/// 格式非法的调度描述按"不到期"处理（fail-closed），只记录告警。
pub fn is_due_now(spec: &ScheduleSpec, now_utc: DateTime<Utc>, tz: Tz) -> bool {
    let local = now_utc.with_timezone(&tz);

    match spec {
        ScheduleSpec::Daily { time } => match parse_hhmm(time) {
            Some((hour, minute)) => local.hour() == hour && local.minute() == minute,
            None => {
                warn!("无效的daily时刻 '{}', 调度按不到期处理", time);
                false
            }
        },
        // 按主体时间字段的调度总是报告到期：实际的分钟匹配
        // 由规则执行器对每个主体单独完成
        ScheduleSpec::DailyPerSubjectField { .. } => true,
        ScheduleSpec::Monthly { day_of_month, time } => match parse_hhmm(time) {
            Some((hour, minute)) => {
                local.day() == *day_of_month && local.hour() == hour && local.minute() == minute
            }
            None => {
                warn!("无效的monthly时刻 '{}', 调度按不到期处理", time);
                false
            }
        },
        ScheduleSpec::Cron { expression } => match Schedule::from_str(expression) {
            Ok(schedule) => {
                // 表达式最近一次计划触发落在当前时刻前一个轮询周期内
                let window_start = local - Duration::seconds(TICK_SECONDS);
                schedule
                    .after(&window_start)
                    .next()
                    .map(|next| next <= local)
                    .unwrap_or(false)
            }
            Err(e) => {
                warn!("无效的CRON表达式 '{}': {}, 调度按不到期处理", expression, e);
                false
            }
        },
    }
}

/// 校验调度描述的静态合法性，供配置入口提前拒绝坏规则
pub fn validate_schedule(spec: &ScheduleSpec) -> EngineResult<()> {
    let check_time = |time: &str| {
        parse_hhmm(time).ok_or_else(|| EngineError::InvalidSchedule {
            expr: time.to_string(),
            message: "期望 HH:MM 格式".to_string(),
        })
    };

    match spec {
        ScheduleSpec::Daily { time } => {
            check_time(time)?;
        }
        ScheduleSpec::DailyPerSubjectField { fallback_time, .. } => {
            check_time(fallback_time)?;
        }
        ScheduleSpec::Monthly { day_of_month, time } => {
            check_time(time)?;
            if *day_of_month == 0 || *day_of_month > 31 {
                return Err(EngineError::InvalidSchedule {
                    expr: day_of_month.to_string(),
                    message: "day_of_month 必须在 1-31 之间".to_string(),
                });
            }
        }
        ScheduleSpec::Cron { expression } => {
            Schedule::from_str(expression).map_err(|e| EngineError::InvalidSchedule {
                expr: expression.clone(),
                message: e.to_string(),
            })?;
        }
    }
    Ok(())
}

/// 主体自身的时刻字段（或回退时刻）是否命中当前本地分钟
///
/// 规则执行器用它完成 `DailyPerSubjectField` 调度的逐主体细化，
/// 时间型提醒规划器用它匹配主体的偏好提醒时刻。
pub fn subject_minute_matches(
    preferred_time: Option<&str>,
    fallback_time: &str,
    now_utc: DateTime<Utc>,
    tz: Tz,
) -> bool {
    let time = preferred_time.unwrap_or(fallback_time);
    let Some((hour, minute)) = parse_hhmm(time) else {
        warn!("无效的主体时刻 '{}', 按不匹配处理", time);
        return false;
    };
    let local = now_utc.with_timezone(&tz);
    local.hour() == hour && local.minute() == minute
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const IST: Tz = chrono_tz::Asia::Kolkata;

    /// 构造对应IST本地时刻的UTC时间
    fn ist(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        IST.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_daily_minute_exact() {
        let spec = ScheduleSpec::Daily {
            time: "18:00".to_string(),
        };

        assert!(is_due_now(&spec, ist(2025, 6, 15, 18, 0), IST));
        assert!(!is_due_now(&spec, ist(2025, 6, 15, 17, 59), IST));
        assert!(!is_due_now(&spec, ist(2025, 6, 15, 18, 1), IST));
    }

    #[test]
    fn test_daily_respects_timezone() {
        let spec = ScheduleSpec::Daily {
            time: "09:00".to_string(),
        };
        // UTC 03:30 == IST 09:00
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 3, 30, 0).unwrap();
        assert!(is_due_now(&spec, now, IST));
        assert!(!is_due_now(&spec, now, chrono_tz::UTC));
    }

    #[test]
    fn test_monthly_boundary() {
        let spec = ScheduleSpec::Monthly {
            day_of_month: 1,
            time: "02:00".to_string(),
        };

        assert!(is_due_now(&spec, ist(2025, 7, 1, 2, 0), IST));
        assert!(!is_due_now(&spec, ist(2025, 7, 2, 2, 0), IST));
        assert!(!is_due_now(&spec, ist(2025, 7, 1, 2, 1), IST));
        assert!(!is_due_now(&spec, ist(2025, 6, 30, 2, 0), IST));
    }

    #[test]
    fn test_per_subject_field_always_due() {
        let spec = ScheduleSpec::DailyPerSubjectField {
            field_name: "preferred_time".to_string(),
            fallback_time: "18:00".to_string(),
        };
        assert!(is_due_now(&spec, ist(2025, 6, 15, 3, 41), IST));
    }

    #[test]
    fn test_cron_fires_within_tick_window() {
        // 每小时第0分钟
        let spec = ScheduleSpec::Cron {
            expression: "0 0 * * * *".to_string(),
        };

        assert!(is_due_now(&spec, ist(2025, 6, 15, 14, 0), IST));
        assert!(!is_due_now(&spec, ist(2025, 6, 15, 14, 1), IST));
        assert!(!is_due_now(&spec, ist(2025, 6, 15, 14, 30), IST));
    }

    #[test]
    fn test_invalid_specs_never_fire() {
        let bad_time = ScheduleSpec::Daily {
            time: "25:99".to_string(),
        };
        assert!(!is_due_now(&bad_time, ist(2025, 6, 15, 18, 0), IST));

        let bad_cron = ScheduleSpec::Cron {
            expression: "not a cron".to_string(),
        };
        assert!(!is_due_now(&bad_cron, ist(2025, 6, 15, 18, 0), IST));
    }

    #[test]
    fn test_validate_schedule() {
        assert!(validate_schedule(&ScheduleSpec::Daily {
            time: "09:00".to_string()
        })
        .is_ok());
        assert!(validate_schedule(&ScheduleSpec::Daily {
            time: "9am".to_string()
        })
        .is_err());
        assert!(validate_schedule(&ScheduleSpec::Monthly {
            day_of_month: 32,
            time: "02:00".to_string()
        })
        .is_err());
        assert!(validate_schedule(&ScheduleSpec::Cron {
            expression: "0 0 2 * * *".to_string()
        })
        .is_ok());
    }

    #[test]
    fn test_subject_minute_matches() {
        let now = ist(2025, 6, 15, 18, 30);

        assert!(subject_minute_matches(Some("18:30"), "09:00", now, IST));
        assert!(!subject_minute_matches(Some("18:31"), "09:00", now, IST));
        // 无偏好时刻落到回退时刻
        assert!(subject_minute_matches(None, "18:30", now, IST));
        assert!(!subject_minute_matches(None, "09:00", now, IST));
        // 坏数据按不匹配处理
        assert!(!subject_minute_matches(Some("half past six"), "09:00", now, IST));
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("18:00"), Some((18, 0)));
        assert_eq!(parse_hhmm("00:00"), Some((0, 0)));
        assert_eq!(parse_hhmm("23:59"), Some((23, 59)));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("18:60"), None);
        assert_eq!(parse_hhmm("1800"), None);
        assert_eq!(parse_hhmm(""), None);
    }
}
