//! 执行侧：作业消费、规则执行与动作执行器

pub mod executors;
pub mod reports;
pub mod rule_runner;
pub mod service;

pub use executors::{
    ExecutorRegistry, ExportDataExecutor, GenerateReportExecutor, SendReminderExecutor,
};
pub use rule_runner::RuleRunner;
pub use service::{WorkerOptions, WorkerService, WorkerServiceBuilder};
