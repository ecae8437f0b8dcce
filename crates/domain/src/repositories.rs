//! 仓储抽象层
//!
//! 带 `conn` 参数的方法在调用方持有的事务里执行，保证一个计划的
//! 认领、策略写入与状态回写落在同一个事务边界内。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replan_core::RescheduleResult;
use sqlx::PgConnection;

use crate::plan::{PlanStatus, SchedulePlan};
use crate::queue::{QueueItemStatus, RescheduleQueueItem};
use crate::schedule::{ScheduleEvent, ScheduleTask, ScheduleTaskStatus, ScheduleWindow};

/// 日程计划仓储
#[async_trait]
pub trait SchedulePlanRepository: Send + Sync {
    async fn create(&self, plan: &SchedulePlan) -> RescheduleResult<SchedulePlan>;

    async fn get_by_id(&self, id: i64) -> RescheduleResult<SchedulePlan>;

    /// 用户当前的活跃计划（如有）
    async fn get_active_by_user(&self, user_id: i64) -> RescheduleResult<Option<SchedulePlan>>;

    /// 用户的全部计划，按创建时间倒序
    async fn list_by_user(&self, user_id: i64) -> RescheduleResult<Vec<SchedulePlan>>;

    /// 乐观锁更新：版本不匹配时返回 VersionConflict
    async fn update_with_version(&self, plan: &SchedulePlan) -> RescheduleResult<SchedulePlan>;

    async fn update_status(&self, id: i64, status: PlanStatus) -> RescheduleResult<()>;

    async fn mark_stale(&self, id: i64) -> RescheduleResult<()>;
}

/// 重排队列仓储
#[async_trait]
pub trait RescheduleQueueRepository: Send + Sync {
    /// 合并插入：同一 (计划, 触发类型, 实体) 的 PENDING 行被复用，
    /// 载荷取新值，去抖截止时间重新武装
    async fn upsert(&self, item: &RescheduleQueueItem) -> RescheduleResult<RescheduleQueueItem>;

    /// 存在到期 PENDING 条目的计划ID，按批内最高紧急度与最早入队排序
    async fn dirty_plan_ids(&self, now: DateTime<Utc>, limit: i64) -> RescheduleResult<Vec<i64>>;

    /// 在事务内认领一个计划的全部到期 PENDING 条目（FOR UPDATE SKIP LOCKED）
    async fn fetch_and_lock_batch(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
        now: DateTime<Utc>,
    ) -> RescheduleResult<Vec<RescheduleQueueItem>>;

    async fn mark_processing(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<()>;

    async fn update_batch_status(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
        status: QueueItemStatus,
        error_message: Option<&str>,
    ) -> RescheduleResult<()>;

    async fn increment_retry_count(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<()>;

    /// 失败条目重新回到 PENDING，带退避后的去抖截止时间
    async fn requeue_for_retry(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
        debounce_until: DateTime<Utc>,
    ) -> RescheduleResult<()>;

    /// 清理已完成的历史条目，返回删除行数
    async fn delete_completed(&self, older_than: DateTime<Utc>) -> RescheduleResult<u64>;
}

/// 排程任务仓储
#[async_trait]
pub trait ScheduleTaskRepository: Send + Sync {
    async fn list_by_plan(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
    ) -> RescheduleResult<Vec<ScheduleTask>>;

    async fn get_by_ids(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<Vec<ScheduleTask>>;

    async fn update_schedule_status(
        &self,
        conn: &mut PgConnection,
        id: i64,
        status: ScheduleTaskStatus,
        reason: Option<&str>,
    ) -> RescheduleResult<()>;
}

/// 排程事件仓储
#[async_trait]
pub trait ScheduleEventRepository: Send + Sync {
    async fn list_by_plan_and_range(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
        from_date_ms: i64,
        to_date_ms: i64,
    ) -> RescheduleResult<Vec<ScheduleEvent>>;

    async fn get_by_id(
        &self,
        conn: &mut PgConnection,
        id: i64,
    ) -> RescheduleResult<ScheduleEvent>;

    async fn create_batch(
        &self,
        conn: &mut PgConnection,
        events: &[ScheduleEvent],
    ) -> RescheduleResult<Vec<ScheduleEvent>>;

    async fn update_batch(
        &self,
        conn: &mut PgConnection,
        events: &[ScheduleEvent],
    ) -> RescheduleResult<()>;

    async fn delete_by_ids(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<u64>;

    /// 删除某日期（含）之后的全部 PLANNED 事件，钉住与已完成的不受影响
    async fn delete_planned_from_date(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
        from_date_ms: i64,
    ) -> RescheduleResult<u64>;
}

/// 可用时间窗口仓储
#[async_trait]
pub trait ScheduleWindowRepository: Send + Sync {
    async fn list_by_user_and_range(
        &self,
        conn: &mut PgConnection,
        user_id: i64,
        from_date_ms: i64,
        to_date_ms: i64,
    ) -> RescheduleResult<Vec<ScheduleWindow>>;
}
