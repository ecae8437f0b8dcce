pub mod config;
pub mod errors;

pub use config::{AppConfig, DatabaseConfig, OptimizationConfig, RetentionConfig, WorkerConfig};
pub use errors::{RescheduleError, RescheduleResult};
