pub mod message;
pub mod reminder;
pub mod rule;
pub mod run;
pub mod subject;
pub mod task_record;

pub use message::{ActionMessage, CancelMessage, JobMessage, JobPayload, RunRuleMessage};
pub use reminder::{ReminderJob, ReminderStatus};
pub use rule::{ActionSpec, Condition, Rule, ScheduleSpec};
pub use run::{RunStatus, ScheduledJobRun};
pub use subject::{ActivityRecord, Subject};
pub use task_record::{LifecycleEvent, TaskRecord, TaskState};
