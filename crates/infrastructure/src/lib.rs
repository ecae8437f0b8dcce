//! 基础设施层：PostgreSQL仓储实现与求解服务HTTP客户端

pub mod db;
pub mod optimization_client;
pub mod postgres;

pub use db::create_pool;
pub use optimization_client::HttpOptimizationClient;
pub use postgres::{
    PostgresEventRepository, PostgresPlanRepository, PostgresQueueRepository,
    PostgresTaskRepository, PostgresWindowRepository,
};
