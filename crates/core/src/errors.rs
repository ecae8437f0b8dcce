use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RescheduleError {
    #[error("数据库操作失败: {0}")]
    DatabaseOperation(String),
    #[error("日程计划不存在: id={id}")]
    PlanNotFound { id: i64 },
    #[error("非法状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("乐观锁冲突: 计划 {id} 的版本 {expected} 已过期")]
    VersionConflict { id: i64, expected: i32 },
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("数据序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("优化服务调用失败: {0}")]
    OptimizationService(String),
    #[error("网络连接失败: {0}")]
    Network(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("系统内部错误: {0}")]
    Internal(String),
}

pub type RescheduleResult<T> = Result<T, RescheduleError>;

impl RescheduleError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn plan_not_found(id: i64) -> Self {
        Self::PlanNotFound { id }
    }
    pub fn invalid_transition<S: Into<String>>(from: S, to: S) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }
    pub fn version_conflict(id: i64, expected: i32) -> Self {
        Self::VersionConflict { id, expected }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn optimization_error<S: Into<String>>(msg: S) -> Self {
        Self::OptimizationService(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RescheduleError::Internal(_) | RescheduleError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RescheduleError::DatabaseOperation(_)
                | RescheduleError::OptimizationService(_)
                | RescheduleError::Network(_)
                | RescheduleError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for RescheduleError {
    fn from(err: sqlx::Error) -> Self {
        RescheduleError::DatabaseOperation(err.to_string())
    }
}

impl From<serde_json::Error> for RescheduleError {
    fn from(err: serde_json::Error) -> Self {
        RescheduleError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for RescheduleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RescheduleError::Timeout(err.to_string())
        } else {
            RescheduleError::Network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for RescheduleError {
    fn from(err: anyhow::Error) -> Self {
        RescheduleError::Internal(err.to_string())
    }
}
