//! 调度侧：规则轮询、时间型提醒规划与生命周期信号折叠

pub mod controller;
pub mod lifecycle_listener;
pub mod poller;
pub mod reminder_planner;

pub use controller::DispatcherService;
pub use lifecycle_listener::LifecycleListener;
pub use poller::RulePoller;
pub use reminder_planner::ReminderPlanner;
