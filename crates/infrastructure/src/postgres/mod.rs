pub mod event_repository;
pub mod plan_repository;
pub mod queue_repository;
pub mod task_repository;
pub mod window_repository;

pub use event_repository::PostgresEventRepository;
pub use plan_repository::PostgresPlanRepository;
pub use queue_repository::PostgresQueueRepository;
pub use task_repository::PostgresTaskRepository;
pub use window_repository::PostgresWindowRepository;
