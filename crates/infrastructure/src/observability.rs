use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use ruleflow_core::{config::ObservabilityConfig, EngineError, EngineResult};

/// Metrics collector for the rule engine
///
/// 指标通过 `metrics` facade 注册；安装Prometheus导出器后
/// 即可在配置的地址抓取。
pub struct MetricsCollector {
    rules_fired_total: Counter,
    jobs_dispatched_total: Counter,
    job_failures_total: Counter,
    job_retries_total: Counter,
    send_failures_total: Counter,
    reminders_sent_total: Counter,

    job_queue_depth: Gauge,
    lifecycle_queue_depth: Gauge,

    poll_tick_duration: Histogram,
    job_execution_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            rules_fired_total: counter!("ruleflow_rules_fired_total"),
            jobs_dispatched_total: counter!("ruleflow_jobs_dispatched_total"),
            job_failures_total: counter!("ruleflow_job_failures_total"),
            job_retries_total: counter!("ruleflow_job_retries_total"),
            send_failures_total: counter!("ruleflow_send_failures_total"),
            reminders_sent_total: counter!("ruleflow_reminders_sent_total"),
            job_queue_depth: gauge!("ruleflow_job_queue_depth"),
            lifecycle_queue_depth: gauge!("ruleflow_lifecycle_queue_depth"),
            poll_tick_duration: histogram!("ruleflow_poll_tick_duration_seconds"),
            job_execution_duration: histogram!("ruleflow_job_execution_duration_seconds"),
        }
    }

    /// Record a rule whose schedule matched and was dispatched
    pub fn record_rule_fired(&self, rule_name: &str) {
        self.rules_fired_total.increment(1);
        info!(rule_name = rule_name, "规则已触发");
    }

    pub fn record_job_dispatched(&self) {
        self.jobs_dispatched_total.increment(1);
    }

    pub fn record_job_failure(&self, job_name: &str, error: &str) {
        self.job_failures_total.increment(1);
        warn!(job_name = job_name, error = error, "作业执行失败");
    }

    pub fn record_job_retry(&self, job_name: &str, retry_count: i32) {
        self.job_retries_total.increment(1);
        info!(job_name = job_name, retry_count = retry_count, "作业重试");
    }

    pub fn record_send_failure(&self, channel: &str) {
        self.send_failures_total.increment(1);
        warn!(channel = channel, "通知渠道发送失败");
    }

    pub fn record_reminder_sent(&self) {
        self.reminders_sent_total.increment(1);
    }

    pub fn update_job_queue_depth(&self, depth: f64) {
        self.job_queue_depth.set(depth);
    }

    pub fn update_lifecycle_queue_depth(&self, depth: f64) {
        self.lifecycle_queue_depth.set(depth);
    }

    pub fn record_poll_tick(&self, duration_seconds: f64) {
        self.poll_tick_duration.record(duration_seconds);
    }

    pub fn record_job_execution(&self, duration_seconds: f64) {
        self.job_execution_duration.record(duration_seconds);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// 按配置安装Prometheus导出器；未配置监听地址时只注册facade
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> EngineResult<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let Some(bind) = &config.prometheus_bind else {
        return Ok(());
    };

    let addr: std::net::SocketAddr = bind
        .parse()
        .map_err(|e| EngineError::Configuration(format!("无效的Prometheus监听地址 {bind}: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Configuration(format!("安装Prometheus导出器失败: {e}")))?;

    info!("Prometheus导出器已监听: {bind}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_records_without_exporter() {
        // facade 未安装导出器时所有记录都是no-op，不应panic
        let collector = MetricsCollector::new();
        collector.record_rule_fired("daily-reminder");
        collector.record_job_dispatched();
        collector.record_job_failure("run_rule", "boom");
        collector.record_job_retry("run_rule", 1);
        collector.record_send_failure("chat");
        collector.record_reminder_sent();
        collector.update_job_queue_depth(3.0);
        collector.update_lifecycle_queue_depth(1.0);
        collector.record_poll_tick(0.01);
        collector.record_job_execution(0.25);
    }
}
