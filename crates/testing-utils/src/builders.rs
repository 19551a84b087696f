//! Test data builders for creating test entities
//!
//! Builder patterns with sensible defaults and easy customization.

use chrono::{DateTime, Utc};

use ruleflow_core::models::{
    ActionSpec, ActivityRecord, Condition, Rule, ScheduleSpec, Subject, TaskRecord, TaskState,
};

/// Builder for creating test Rule entities
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    pub fn new() -> Self {
        Self {
            rule: Rule {
                id: 1,
                name: "test_rule".to_string(),
                enabled: true,
                schedule: ScheduleSpec::Daily {
                    time: "09:00".to_string(),
                },
                conditions: vec![],
                actions: vec![],
                target: None,
                last_run_at: None,
                next_run_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.rule.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.rule.name = name.to_string();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.rule.enabled = enabled;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleSpec) -> Self {
        self.rule.schedule = schedule;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.rule.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.rule.actions.push(action);
        self
    }

    pub fn with_target(mut self, target: Vec<i64>) -> Self {
        self.rule.target = Some(target);
        self
    }

    pub fn build(self) -> Rule {
        self.rule
    }
}

impl Default for RuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Subject snapshots
pub struct SubjectBuilder {
    subject: Subject,
}

impl SubjectBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            subject: Subject {
                id,
                name: format!("subject-{id}"),
                email: Some(format!("subject{id}@example.com")),
                webhook_url: None,
                receive_reminders: true,
                preferred_time: None,
                last_activity_at: None,
                last_reminder_sent_at: None,
                activities: vec![],
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.subject.name = name.to_string();
        self
    }

    pub fn with_email(mut self, email: Option<&str>) -> Self {
        self.subject.email = email.map(|e| e.to_string());
        self
    }

    pub fn with_webhook(mut self, url: &str) -> Self {
        self.subject.webhook_url = Some(url.to_string());
        self
    }

    pub fn receive_reminders(mut self, receive: bool) -> Self {
        self.subject.receive_reminders = receive;
        self
    }

    pub fn with_preferred_time(mut self, time: &str) -> Self {
        self.subject.preferred_time = Some(time.to_string());
        self
    }

    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.subject.last_activity_at = Some(at);
        self
    }

    pub fn with_last_reminder(mut self, at: DateTime<Utc>) -> Self {
        self.subject.last_reminder_sent_at = Some(at);
        self
    }

    pub fn with_activity(mut self, occurred_at: DateTime<Utc>, amount: f64, resource: &str) -> Self {
        self.subject.activities.push(ActivityRecord {
            occurred_at,
            amount,
            resource_key: resource.to_string(),
        });
        self
    }

    pub fn build(self) -> Subject {
        self.subject
    }
}

/// Builder for creating test TaskRecord entities
pub struct TaskRecordBuilder {
    record: TaskRecord,
}

impl TaskRecordBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            record: TaskRecord::minimal(id, "test_task", Utc::now()),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.record.name = name.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskState) -> Self {
        self.record.status = status;
        self
    }

    pub fn with_worker(mut self, worker: &str) -> Self {
        self.record.worker = Some(worker.to_string());
        self
    }

    pub fn with_times(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.record.start_time = start;
        self.record.end_time = end;
        self.record.duration_seconds = match (start, end) {
            (Some(s), Some(e)) => Some((e - s).num_seconds().max(0)),
            _ => None,
        };
        self
    }

    pub fn build(self) -> TaskRecord {
        self.record
    }
}
