use async_trait::async_trait;

use crate::models::ActionMessage;

/// 工作单元的显式结果标签
///
/// 替代以异常驱动重试的控制流：执行器内部捕获一切失败，
/// 由调度层根据标签决定重新入队还是终结。
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// 执行成功
    Ok,
    /// 瞬时失败，可在有界重试预算内重新入队
    RetryableError(String),
    /// 永久失败，绝不重新入队
    FatalError(String),
}

impl ExecutionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecutionOutcome::Ok)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Ok => None,
            ExecutionOutcome::RetryableError(msg) | ExecutionOutcome::FatalError(msg) => Some(msg),
        }
    }
}

/// 动作执行器：以 `(主体, 动作参数, 规则)` 为粒度的幂等工作单元
///
/// "每次调用一次发送/一份报告"粒度的幂等：重试的调用可能重复发送，
/// 这是可接受的至少一次投递语义。
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// 执行器注册名，与 ActionSpec.action_name 对应
    fn name(&self) -> &str;

    /// 执行动作；内部失败必须被捕获并映射到结果标签，不得panic
    async fn execute(&self, action: &ActionMessage) -> ExecutionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        assert!(ExecutionOutcome::Ok.is_ok());
        assert_eq!(ExecutionOutcome::Ok.error_message(), None);

        let retryable = ExecutionOutcome::RetryableError("超时".to_string());
        assert!(!retryable.is_ok());
        assert_eq!(retryable.error_message(), Some("超时"));
    }
}
