use replan_core::{DatabaseConfig, RescheduleError, RescheduleResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// 按配置创建连接池
pub async fn create_pool(config: &DatabaseConfig) -> RescheduleResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout())
        .connect(&config.url)
        .await
        .map_err(|e| RescheduleError::database_error(format!("连接数据库失败: {e}")))
}
