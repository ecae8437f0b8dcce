use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RescheduleError, RescheduleResult};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub optimization: OptimizationConfig,
    pub worker: WorkerConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

/// 外部优化服务(求解器)客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_seconds: u64,
    pub max_plans_per_poll: i64,
    pub max_item_retries: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub sweep_interval_seconds: u64,
    pub completed_retention_hours: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            optimization: OptimizationConfig::default(),
            worker: WorkerConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/replan".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
        }
    }
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8086".to_string(),
            timeout_seconds: 30,
            retry_count: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            max_plans_per_poll: 10,
            max_item_retries: 3,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 3600,
            completed_retention_hours: 24,
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 优先级: 默认值 < 配置文件 < REPLAN__ 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> RescheduleResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("REPLAN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RescheduleError::config_error(format!("加载配置失败: {e}")))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| RescheduleError::config_error(format!("解析配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RescheduleResult<()> {
        if self.database.url.is_empty() {
            return Err(RescheduleError::config_error("数据库URL不能为空"));
        }
        if self.database.max_connections == 0 {
            return Err(RescheduleError::config_error("数据库最大连接数必须大于0"));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(RescheduleError::config_error(
                "数据库最大连接数不能小于最小连接数",
            ));
        }
        if self.optimization.base_url.is_empty() {
            return Err(RescheduleError::config_error("优化服务URL不能为空"));
        }
        if self.worker.poll_interval_seconds == 0 {
            return Err(RescheduleError::config_error("轮询间隔必须大于0"));
        }
        if self.worker.max_plans_per_poll <= 0 {
            return Err(RescheduleError::config_error("每轮最大计划数必须大于0"));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

impl OptimizationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.max_plans_per_poll, 10);
        assert_eq!(config.optimization.retry_count, 2);
    }

    #[test]
    fn test_validate_rejects_zero_connections() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_solver_url() {
        let mut config = AppConfig::default();
        config.optimization.base_url = String::new();
        assert!(config.validate().is_err());
    }
}
