pub mod executor;
pub mod message_queue;
pub mod notifier;
pub mod repository;
pub mod subject_source;

pub use executor::{ActionExecutor, ExecutionOutcome};
pub use message_queue::MessageQueue;
pub use notifier::{ArtifactStore, ChatNotifier, EmailAttachment, EmailNotifier};
pub use repository::{
    ReminderRepository, RuleRepository, RunFilter, RunRepository, TaskRecordFilter,
    TaskRecordRepository,
};
pub use subject_source::SubjectSource;
