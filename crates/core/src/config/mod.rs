use std::path::Path;

use chrono_tz::Tz;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub poller: PollerConfig,
    pub reminder: ReminderConfig,
    pub worker: WorkerConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 规则执行与动作作业共用的工作队列
    pub job_queue: String,
    /// 生命周期信号队列，独立于作业队列消费
    pub lifecycle_queue: String,
    pub max_retries: i32,
    pub retry_initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    pub enabled: bool,
    /// 轮询周期；超过60秒会错过分钟精度的触发
    pub tick_interval_seconds: u64,
    /// 主体解析的批大小
    pub subject_batch_size: i64,
    /// 调度评估使用的IANA时区
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    pub enabled: bool,
    /// 主体未设置偏好时刻时的默认提醒时刻
    pub default_time: String,
    /// 不活跃天数阈值，达到即具备提醒资格
    pub inactive_days: i64,
    /// 新资源回溯天数，窗口内有新资源上线也具备提醒资格
    pub new_resource_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    pub max_concurrent_jobs: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub webhook_timeout_seconds: u64,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root_dir: String,
    pub base_url: String,
    pub signed_url_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    /// Prometheus导出器监听地址，None表示不安装导出器
    pub prometheus_bind: Option<String>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:ruleflow.db".to_string(),
                max_connections: 5,
                min_connections: 1,
                connection_timeout_seconds: 30,
            },
            queue: QueueConfig {
                job_queue: "jobs".to_string(),
                lifecycle_queue: "lifecycle_events".to_string(),
                max_retries: 3,
                retry_initial_backoff_ms: 100,
            },
            poller: PollerConfig {
                enabled: true,
                tick_interval_seconds: 60,
                subject_batch_size: 200,
                timezone: "Asia/Kolkata".to_string(),
            },
            reminder: ReminderConfig {
                enabled: true,
                default_time: "18:00".to_string(),
                inactive_days: 7,
                new_resource_days: 7,
            },
            worker: WorkerConfig {
                enabled: true,
                worker_id: "embedded-worker".to_string(),
                max_concurrent_jobs: 10,
                poll_interval_ms: 100,
                job_timeout_seconds: 300,
            },
            notifier: NotifierConfig {
                webhook_timeout_seconds: 5,
                smtp_host: "localhost".to_string(),
                smtp_port: 587,
                smtp_username: String::new(),
                smtp_password: String::new(),
                from_address: "noreply@ruleflow.local".to_string(),
                from_name: "Ruleflow".to_string(),
            },
            storage: StorageConfig {
                root_dir: "artifacts".to_string(),
                base_url: "http://localhost:8080/artifacts".to_string(),
                signed_url_ttl_seconds: 86400,
            },
            observability: ObservabilityConfig {
                metrics_enabled: true,
                prometheus_bind: None,
                log_level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载配置：TOML文件 + `RULEFLOW_` 前缀的环境变量覆盖
    pub fn load(config_path: Option<&str>) -> EngineResult<Self> {
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).map_err(|e| {
                EngineError::Configuration(format!("构建默认配置失败: {e}"))
            })?);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(EngineError::Configuration(format!("配置文件不存在: {path}")));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            for path in ["config/ruleflow.toml", "ruleflow.toml"] {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix("RULEFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::Configuration(format!("加载配置失败: {e}")))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| EngineError::Configuration(format!("解析配置失败: {e}")))?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// 嵌入式部署的默认配置
    pub fn embedded_default() -> Self {
        Self::default()
    }

    /// 校验各配置段
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.url.is_empty() {
            return Err(EngineError::Configuration("数据库URL不能为空".to_string()));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(EngineError::Configuration(
                "数据库最大连接数不能小于最小连接数".to_string(),
            ));
        }
        if self.queue.job_queue.is_empty() || self.queue.lifecycle_queue.is_empty() {
            return Err(EngineError::Configuration("队列名称不能为空".to_string()));
        }
        if self.queue.max_retries < 0 {
            return Err(EngineError::Configuration("最大重试次数不能为负".to_string()));
        }
        if self.poller.tick_interval_seconds == 0 || self.poller.tick_interval_seconds > 60 {
            return Err(EngineError::Configuration(
                "轮询周期必须在1-60秒之间，否则会错过分钟精度的触发".to_string(),
            ));
        }
        if self.poller.subject_batch_size <= 0 {
            return Err(EngineError::Configuration("主体批大小必须为正".to_string()));
        }
        self.poller.tz()?;
        parse_hhmm_strict(&self.reminder.default_time)?;
        if self.worker.max_concurrent_jobs == 0 {
            return Err(EngineError::Configuration("最大并发作业数必须为正".to_string()));
        }
        if self.worker.worker_id.is_empty() {
            return Err(EngineError::Configuration("Worker ID不能为空".to_string()));
        }
        Ok(())
    }
}

impl PollerConfig {
    /// 解析配置中的IANA时区
    pub fn tz(&self) -> EngineResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            EngineError::Configuration(format!("无效的IANA时区: {}", self.timezone))
        })
    }
}

/// 校验 `"HH:MM"` 时刻字符串
fn parse_hhmm_strict(value: &str) -> EngineResult<(u32, u32)> {
    let mut parts = value.splitn(2, ':');
    let hour = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .filter(|h| *h < 24);
    let minute = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .filter(|m| *m < 60);

    match (hour, minute) {
        (Some(h), Some(m)) => Ok((h, m)),
        _ => Err(EngineError::Configuration(format!(
            "无效的时刻格式（期望 HH:MM）: {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::embedded_default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.url, "sqlite:ruleflow.db");
        assert_eq!(config.queue.job_queue, "jobs");
        assert_eq!(config.poller.tick_interval_seconds, 60);
        assert_eq!(config.poller.timezone, "Asia/Kolkata");
        assert_eq!(config.reminder.default_time, "18:00");
        assert_eq!(config.worker.max_concurrent_jobs, 10);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let mut config = AppConfig::embedded_default();
        config.poller.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_interval_bounds() {
        let mut config = AppConfig::embedded_default();
        config.poller.tick_interval_seconds = 120;
        assert!(config.validate().is_err());

        config.poller.tick_interval_seconds = 0;
        assert!(config.validate().is_err());

        config.poller.tick_interval_seconds = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_default_time_rejected() {
        let mut config = AppConfig::embedded_default();
        config.reminder.default_time = "25:00".to_string();
        assert!(config.validate().is_err());

        config.reminder.default_time = "1800".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[poller]
tick_interval_seconds = 30
timezone = "Europe/Berlin"

[worker]
worker_id = "worker-42"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.poller.tick_interval_seconds, 30);
        assert_eq!(config.poller.timezone, "Europe/Berlin");
        assert_eq!(config.worker.worker_id, "worker-42");
        // 未覆盖的段保持默认值
        assert_eq!(config.queue.job_queue, "jobs");
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let result = AppConfig::load(Some("/nonexistent/ruleflow.toml"));
        assert!(result.is_err());
    }
}
