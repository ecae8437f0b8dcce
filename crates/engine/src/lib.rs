//! 重排引擎：策略实现、落位算法与轮询工作器

pub mod claim_table;
pub mod placement;
pub mod retention;
pub mod strategies;
pub mod worker;

pub use claim_table::PlanClaimTable;
pub use retention::RetentionSweeper;
pub use strategies::{
    FullReplanStrategy, InsertionStrategy, RescheduleStrategy, RippleStrategy, StrategyDeps,
    StrategyRegistry,
};
pub use worker::RescheduleWorker;
