//! 领域层：实体、状态机、队列模型、策略选择与仓储抽象

pub mod optimization;
pub mod plan;
pub mod queue;
pub mod repositories;
pub mod schedule;

pub use optimization::{
    Assignment, OptimizationClient, OptimizationRequest, Params, PlanResult, SolverResponse,
    SolverStrategyType, TaskInput, UnscheduledTask, Weights, Window,
};
pub use plan::{PlanStatus, SchedulePlan};
pub use queue::{
    compute_debounce_until, ChangePayload, QueueItemStatus, RescheduleBatch, RescheduleQueueItem,
    RescheduleStrategyKind, StrategyOutcome, TriggerType, DEBOUNCE_WINDOW_MS, MAX_DEBOUNCE_WAIT_MS,
};
pub use repositories::{
    RescheduleQueueRepository, ScheduleEventRepository, SchedulePlanRepository,
    ScheduleTaskRepository, ScheduleWindowRepository,
};
pub use schedule::{
    default_windows, ScheduleEvent, ScheduleEventStatus, ScheduleTask, ScheduleTaskStatus,
    ScheduleWindow, MS_PER_DAY,
};
