use chrono::{DateTime, Utc};

use ruleflow_core::{LifecycleEvent, TaskRecord, TaskState};

/// 生命周期归约器：`(当前记录, 事件, 当前时刻) -> 新记录`
///
/// 纯函数，使易竞态的upsert逻辑无需真实执行基座即可单元测试。
/// 约定：
/// - 记录不存在时防御性创建（get-or-create），乱序信号不报错；
/// - `Revoked` 是粘性终态，此后任何信号都不再改变状态；
/// - 其余转换"后到的信号胜出"；
/// - `duration_seconds` 仅在 start/end 都存在时计算，且非负。
pub fn apply_event(
    current: Option<TaskRecord>,
    event: &LifecycleEvent,
    now: DateTime<Utc>,
) -> TaskRecord {
    let mut record = current.unwrap_or_else(|| {
        let name = match event {
            LifecycleEvent::PreRun { name, .. } => name.as_str(),
            _ => "unknown",
        };
        TaskRecord::minimal(event.task_id(), name, now)
    });

    // 撤销终态粘滞：到达终态后忽略一切后续信号
    if record.status == TaskState::Revoked {
        return record;
    }

    match event {
        LifecycleEvent::PreRun { name, worker, .. } => {
            record.name = name.clone();
            record.status = TaskState::Running;
            record.worker = Some(worker.clone());
            record.start_time = Some(now);
            record.end_time = None;
            record.duration_seconds = None;
            record.progress = 0;
            record.error_message = None;
        }
        LifecycleEvent::PostRun { .. } => {
            record.status = TaskState::Success;
            record.end_time = Some(now);
            record.duration_seconds = compute_duration(record.start_time, record.end_time);
            record.progress = 100;
        }
        LifecycleEvent::Failure { error, .. } => {
            record.status = TaskState::Failed;
            record.end_time = Some(now);
            record.duration_seconds = compute_duration(record.start_time, record.end_time);
            record.progress = 100;
            record.error_message = Some(error.clone());
        }
        LifecycleEvent::Revoked { .. } => {
            record.status = TaskState::Revoked;
            if record.end_time.is_none() {
                record.end_time = Some(now);
            }
            record.duration_seconds = compute_duration(record.start_time, record.end_time);
        }
    }

    record.updated_at = now;
    record
}

fn compute_duration(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).num_seconds().max(0)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pre_run(task_id: &str) -> LifecycleEvent {
        LifecycleEvent::PreRun {
            task_id: task_id.to_string(),
            name: "send_reminder".to_string(),
            worker: "worker-1".to_string(),
        }
    }

    #[test]
    fn test_prerun_creates_running_record() {
        let now = Utc::now();
        let record = apply_event(None, &pre_run("t1"), now);

        assert_eq!(record.id, "t1");
        assert_eq!(record.status, TaskState::Running);
        assert_eq!(record.worker.as_deref(), Some("worker-1"));
        assert_eq!(record.start_time, Some(now));
        assert_eq!(record.progress, 0);
    }

    #[test]
    fn test_postrun_computes_duration() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(42);

        let record = apply_event(None, &pre_run("t1"), t0);
        let record = apply_event(
            Some(record),
            &LifecycleEvent::PostRun {
                task_id: "t1".to_string(),
            },
            t1,
        );

        assert_eq!(record.status, TaskState::Success);
        assert_eq!(record.duration_seconds, Some(42));
        assert_eq!(record.progress, 100);
    }

    #[test]
    fn test_postrun_before_prerun_creates_defensive_record() {
        let now = Utc::now();
        let record = apply_event(
            None,
            &LifecycleEvent::PostRun {
                task_id: "orphan".to_string(),
            },
            now,
        );

        assert_eq!(record.id, "orphan");
        assert_eq!(record.status, TaskState::Success);
        // 没有观测到启动时间，时长保持空
        assert_eq!(record.start_time, None);
        assert_eq!(record.duration_seconds, None);
    }

    #[test]
    fn test_failure_records_error() {
        let now = Utc::now();
        let record = apply_event(None, &pre_run("t1"), now);
        let record = apply_event(
            Some(record),
            &LifecycleEvent::Failure {
                task_id: "t1".to_string(),
                error: "连接超时".to_string(),
            },
            now + Duration::seconds(5),
        );

        assert_eq!(record.status, TaskState::Failed);
        assert_eq!(record.error_message.as_deref(), Some("连接超时"));
        assert_eq!(record.duration_seconds, Some(5));
    }

    #[test]
    fn test_revoked_is_sticky_terminal() {
        let now = Utc::now();
        let record = apply_event(None, &pre_run("t1"), now);
        let record = apply_event(
            Some(record),
            &LifecycleEvent::Revoked {
                task_id: "t1".to_string(),
            },
            now + Duration::seconds(1),
        );
        assert_eq!(record.status, TaskState::Revoked);

        // 撤销之后的任何信号都不再改变状态
        let record = apply_event(
            Some(record),
            &LifecycleEvent::PostRun {
                task_id: "t1".to_string(),
            },
            now + Duration::seconds(2),
        );
        assert_eq!(record.status, TaskState::Revoked);

        let record = apply_event(
            Some(record),
            &pre_run("t1"),
            now + Duration::seconds(3),
        );
        assert_eq!(record.status, TaskState::Revoked);
    }

    #[test]
    fn test_revoke_unknown_task_creates_terminal_record() {
        let now = Utc::now();
        let record = apply_event(
            None,
            &LifecycleEvent::Revoked {
                task_id: "ghost".to_string(),
            },
            now,
        );

        assert_eq!(record.status, TaskState::Revoked);
        assert_eq!(record.end_time, Some(now));
        assert_eq!(record.duration_seconds, None);
    }

    #[test]
    fn test_duration_never_negative() {
        let t0 = Utc::now();
        let mut record = apply_event(None, &pre_run("t1"), t0);
        // 时钟回拨场景：结束时间早于开始时间
        record.start_time = Some(t0 + Duration::seconds(100));
        let record = apply_event(
            Some(record),
            &LifecycleEvent::PostRun {
                task_id: "t1".to_string(),
            },
            t0,
        );
        assert_eq!(record.duration_seconds, Some(0));
    }

    #[test]
    fn test_duplicate_postrun_is_idempotent() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);

        let record = apply_event(None, &pre_run("t1"), t0);
        let first = apply_event(
            Some(record),
            &LifecycleEvent::PostRun {
                task_id: "t1".to_string(),
            },
            t1,
        );
        let second = apply_event(
            Some(first.clone()),
            &LifecycleEvent::PostRun {
                task_id: "t1".to_string(),
            },
            t1,
        );

        assert_eq!(second.status, TaskState::Success);
        assert_eq!(second.duration_seconds, first.duration_seconds);
    }
}
