//! ruleflow-domain：纯引擎逻辑
//!
//! 谓词评估、规则解析、调度判定和生命周期归约。
//! 除主体数据源的读取外不做任何I/O，便于脱离执行基座单元测试。

pub mod lifecycle;
pub mod predicates;
pub mod resolver;
pub mod schedule;

pub use lifecycle::apply_event;
pub use predicates::{PredicateFn, PredicateRegistry};
pub use resolver::RuleResolver;
pub use schedule::{is_due_now, parse_hhmm, subject_minute_matches, validate_schedule};
