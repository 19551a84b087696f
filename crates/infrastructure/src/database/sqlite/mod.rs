mod sqlite_reminder_repository;
mod sqlite_rule_repository;
mod sqlite_run_repository;
mod sqlite_subject_source;
mod sqlite_task_record_repository;

pub use sqlite_reminder_repository::SqliteReminderRepository;
pub use sqlite_rule_repository::SqliteRuleRepository;
pub use sqlite_run_repository::SqliteRunRepository;
pub use sqlite_subject_source::SqliteSubjectSource;
pub use sqlite_task_record_repository::SqliteTaskRecordRepository;
