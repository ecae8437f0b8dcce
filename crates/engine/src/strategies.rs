//! 三种重排策略
//!
//! 波纹调整只动受影响事件附近的时段；插入调整只为变更的任务找位置；
//! 全量重排推翻今天以后的所有未钉住PLANNED事件交给求解器重建。
//! 策略在调用方的事务里执行，失败时由调用方回滚，不留下部分写入。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use replan_core::{RescheduleError, RescheduleResult};
use replan_domain::{
    default_windows, ChangePayload, OptimizationClient, OptimizationRequest, Params, PlanResult,
    RescheduleBatch, RescheduleStrategyKind, ScheduleEvent, ScheduleEventRepository,
    ScheduleEventStatus, SchedulePlan, ScheduleTask, ScheduleTaskRepository, ScheduleTaskStatus,
    ScheduleWindow, ScheduleWindowRepository, StrategyOutcome, TaskInput, Weights, Window,
    MS_PER_DAY,
};
use sqlx::PgConnection;
use tracing::{debug, info, instrument, warn};

use crate::placement::{free_slots, place_task, place_tasks, FreeSlot, Placement};

/// 策略共享的出口依赖
pub struct StrategyDeps {
    pub tasks: Arc<dyn ScheduleTaskRepository>,
    pub events: Arc<dyn ScheduleEventRepository>,
    pub windows: Arc<dyn ScheduleWindowRepository>,
    pub solver: Arc<dyn OptimizationClient>,
}

/// 一次批处理的重排策略
#[async_trait]
pub trait RescheduleStrategy: Send + Sync {
    fn kind(&self) -> RescheduleStrategyKind;

    /// 在调用方事务内执行。返回Err时不得留下部分写入，
    /// 由调用方通过回滚保证。
    async fn run(
        &self,
        conn: &mut PgConnection,
        plan: &SchedulePlan,
        batch: &RescheduleBatch,
    ) -> RescheduleResult<StrategyOutcome>;
}

/// 计划的重排时间范围：今天零点到计划结束（无结束时取14天）
fn plan_horizon(plan: &SchedulePlan) -> (i64, i64) {
    let now_ms = Utc::now().timestamp_millis();
    let today_ms = now_ms - now_ms.rem_euclid(MS_PER_DAY);
    let to_ms = plan.end_date_ms.unwrap_or(today_ms + 14 * MS_PER_DAY);
    (today_ms, to_ms.max(today_ms))
}

async fn load_windows(
    deps: &StrategyDeps,
    conn: &mut PgConnection,
    user_id: i64,
    from_ms: i64,
    to_ms: i64,
) -> RescheduleResult<Vec<ScheduleWindow>> {
    let windows = deps
        .windows
        .list_by_user_and_range(conn, user_id, from_ms, to_ms)
        .await?;
    if windows.is_empty() {
        return Ok(default_windows(user_id, from_ms, to_ms));
    }
    Ok(windows)
}

fn new_event_from_placement(
    plan_id: i64,
    task: &ScheduleTask,
    placement: &Placement,
) -> ScheduleEvent {
    let now = Utc::now();
    ScheduleEvent {
        id: 0, // 将由数据库生成
        schedule_plan_id: plan_id,
        schedule_task_id: task.id,
        title: task.title.clone(),
        date_ms: placement.date_ms,
        start_min: placement.start_min,
        end_min: placement.end_min,
        part_index: placement.part_index,
        total_parts: placement.total_parts,
        status: ScheduleEventStatus::Planned,
        is_pinned: false,
        utility_score: None,
        created_at: now,
        updated_at: now,
    }
}

/// 波纹调整：事件级变更就地生效，被挤开的邻近事件顺延到最近空档
pub struct RippleStrategy {
    deps: Arc<StrategyDeps>,
}

impl RippleStrategy {
    pub fn new(deps: Arc<StrategyDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl RescheduleStrategy for RippleStrategy {
    fn kind(&self) -> RescheduleStrategyKind {
        RescheduleStrategyKind::Ripple
    }

    #[instrument(skip_all, fields(plan_id = %plan.id, items = batch.items.len()))]
    async fn run(
        &self,
        conn: &mut PgConnection,
        plan: &SchedulePlan,
        batch: &RescheduleBatch,
    ) -> RescheduleResult<StrategyOutcome> {
        let started = Instant::now();
        let (from_ms, to_ms) = plan_horizon(plan);

        let mut events = self
            .deps
            .events
            .list_by_plan_and_range(conn, plan.id, from_ms, to_ms)
            .await?;
        let windows = load_windows(&self.deps, conn, plan.user_id, from_ms, to_ms).await?;

        let mut changed: HashSet<i64> = HashSet::new();
        let mut created: Vec<ScheduleEvent> = Vec::new();
        let mut completed_tasks: Vec<i64> = Vec::new();

        for item in &batch.items {
            match item.payload()? {
                ChangePayload::ManualDrag {
                    event_id,
                    date_ms,
                    start_min,
                    end_min,
                } => {
                    let event = find_event_mut(&mut events, event_id)?;
                    event.date_ms = date_ms;
                    event.start_min = start_min;
                    event.end_min = end_min;
                    changed.insert(event_id);
                }
                ChangePayload::EventSplit {
                    event_id,
                    split_at_min,
                } => {
                    let (second, parent_id) = {
                        let event = find_event_mut(&mut events, event_id)?;
                        if split_at_min <= event.start_min || split_at_min >= event.end_min {
                            return Err(RescheduleError::validation_error(format!(
                                "拆分点 {split_at_min} 不在事件 {event_id} 的时段内"
                            )));
                        }
                        let mut second = event.clone();
                        second.id = 0;
                        second.start_min = split_at_min;
                        second.part_index = event.part_index + 1;
                        event.end_min = split_at_min;
                        (second, event.id)
                    };
                    // 同任务所有分片的 total_parts 一并加一
                    for e in events
                        .iter_mut()
                        .filter(|e| e.schedule_task_id == second.schedule_task_id)
                    {
                        e.total_parts += 1;
                        changed.insert(e.id);
                    }
                    let mut second = second;
                    second.total_parts = events
                        .iter()
                        .find(|e| e.id == parent_id)
                        .map(|e| e.total_parts)
                        .unwrap_or(second.total_parts + 1);
                    created.push(second);
                }
                ChangePayload::EventComplete { event_id } => {
                    let task_id = {
                        let event = find_event_mut(&mut events, event_id)?;
                        event.status = ScheduleEventStatus::Completed;
                        changed.insert(event_id);
                        event.schedule_task_id
                    };
                    let all_done = events
                        .iter()
                        .filter(|e| e.schedule_task_id == task_id)
                        .all(|e| e.status != ScheduleEventStatus::Planned);
                    if all_done {
                        completed_tasks.push(task_id);
                    }
                }
                ChangePayload::EventSkip { event_id } => {
                    let (task_id, duration) = {
                        let event = find_event_mut(&mut events, event_id)?;
                        event.status = ScheduleEventStatus::Skipped;
                        changed.insert(event_id);
                        (event.schedule_task_id, event.duration_min())
                    };
                    // 跳过的时长在后面找空档补回
                    let tasks = self.deps.tasks.get_by_ids(conn, &[task_id]).await?;
                    if let Some(task) = tasks.into_iter().next() {
                        let occupancy: Vec<ScheduleEvent> =
                            events.iter().cloned().chain(created.iter().cloned()).collect();
                        let slots = free_slots(&windows, &occupancy);
                        let mut stub = task.clone();
                        stub.duration_min = duration;
                        stub.allow_split = false;
                        if let Some(parts) = place_task(&stub, &slots) {
                            let max_part = events
                                .iter()
                                .filter(|e| e.schedule_task_id == task_id)
                                .map(|e| e.part_index)
                                .max()
                                .unwrap_or(0);
                            for p in parts {
                                let mut event = new_event_from_placement(plan.id, &task, &p);
                                event.part_index = max_part + 1;
                                created.push(event);
                            }
                        } else {
                            warn!("跳过事件 {} 后无空档补回任务 {}", event_id, task_id);
                        }
                    }
                }
                other => {
                    return Err(RescheduleError::validation_error(format!(
                        "波纹调整不处理载荷 {other:?}"
                    )))
                }
            }
        }

        // 被直接变更的事件可能压住邻近事件，把后者顺延到最近空档
        let displaced: Vec<i64> = find_displaced(&events, &changed);
        if !displaced.is_empty() {
            let keep: Vec<ScheduleEvent> = events
                .iter()
                .filter(|e| !displaced.contains(&e.id))
                .cloned()
                .chain(created.iter().cloned())
                .collect();
            let mut slots = free_slots(&windows, &keep);
            for id in &displaced {
                let Some(event) = events.iter_mut().find(|e| e.id == *id) else {
                    continue;
                };
                let duration = event.duration_min();
                if let Some(slot) = slots.iter().copied().find(|s| s.duration_min() >= duration) {
                    event.date_ms = slot.date_ms;
                    event.start_min = slot.start_min;
                    event.end_min = slot.start_min + duration;
                    changed.insert(event.id);
                    slots = consume(slots, &slot, duration);
                } else {
                    debug!("事件 {} 被挤出后无空档可顺延，保持原位", id);
                }
            }
        }

        let updates: Vec<ScheduleEvent> = events
            .iter()
            .filter(|e| changed.contains(&e.id))
            .cloned()
            .collect();
        self.deps.events.update_batch(conn, &updates).await?;
        let created = self.deps.events.create_batch(conn, &created).await?;
        for task_id in completed_tasks {
            self.deps
                .tasks
                .update_schedule_status(conn, task_id, ScheduleTaskStatus::Completed, None)
                .await?;
        }

        let mut updated_ids: Vec<i64> = changed.into_iter().collect();
        updated_ids.extend(created.iter().map(|e| e.id));
        updated_ids.sort_unstable();

        info!("波纹调整完成: 计划 {}, 改动 {} 个事件", plan.id, updated_ids.len());
        Ok(StrategyOutcome {
            success: true,
            updated_event_ids: updated_ids,
            strategy: RescheduleStrategyKind::Ripple,
            duration_ms: started.elapsed().as_millis() as i64,
            score: None,
            error: None,
        })
    }
}

fn find_event_mut<'a>(
    events: &'a mut [ScheduleEvent],
    event_id: i64,
) -> RescheduleResult<&'a mut ScheduleEvent> {
    events
        .iter_mut()
        .find(|e| e.id == event_id)
        .ok_or_else(|| RescheduleError::validation_error(format!("日程事件 {event_id} 不存在")))
}

/// 与已变更事件重叠的未钉住PLANNED事件
fn find_displaced(events: &[ScheduleEvent], changed: &HashSet<i64>) -> Vec<i64> {
    let mut displaced = Vec::new();
    for event in events {
        if changed.contains(&event.id) || !event.is_movable() {
            continue;
        }
        let overlaps = events.iter().any(|other| {
            changed.contains(&other.id)
                && other.status != ScheduleEventStatus::Skipped
                && other.date_ms == event.date_ms
                && other.start_min < event.end_min
                && other.end_min > event.start_min
        });
        if overlaps {
            displaced.push(event.id);
        }
    }
    displaced
}

fn consume(slots: Vec<FreeSlot>, used: &FreeSlot, duration: i32) -> Vec<FreeSlot> {
    slots
        .into_iter()
        .filter_map(|s| {
            if s == *used {
                let remaining = FreeSlot {
                    date_ms: s.date_ms,
                    start_min: s.start_min + duration,
                    end_min: s.end_min,
                };
                (remaining.duration_min() > 0).then_some(remaining)
            } else {
                Some(s)
            }
        })
        .collect()
}

/// 插入调整：只为变更的任务重新找位置，其余事件保持不动
pub struct InsertionStrategy {
    deps: Arc<StrategyDeps>,
}

impl InsertionStrategy {
    pub fn new(deps: Arc<StrategyDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl RescheduleStrategy for InsertionStrategy {
    fn kind(&self) -> RescheduleStrategyKind {
        RescheduleStrategyKind::Insertion
    }

    #[instrument(skip_all, fields(plan_id = %plan.id, items = batch.items.len()))]
    async fn run(
        &self,
        conn: &mut PgConnection,
        plan: &SchedulePlan,
        batch: &RescheduleBatch,
    ) -> RescheduleResult<StrategyOutcome> {
        let started = Instant::now();
        let (from_ms, to_ms) = plan_horizon(plan);

        let mut deleted_task_ids: Vec<i64> = Vec::new();
        let mut replace_task_ids: Vec<i64> = Vec::new();
        for item in &batch.items {
            match item.payload()? {
                ChangePayload::TaskDeleted { schedule_task_id } => {
                    deleted_task_ids.push(schedule_task_id)
                }
                ChangePayload::TaskAdded { schedule_task_id }
                | ChangePayload::ConstraintChange { schedule_task_id } => {
                    replace_task_ids.push(schedule_task_id)
                }
                other => {
                    return Err(RescheduleError::validation_error(format!(
                        "插入调整不处理载荷 {other:?}"
                    )))
                }
            }
        }

        let events = self
            .deps
            .events
            .list_by_plan_and_range(conn, plan.id, from_ms, to_ms)
            .await?;
        let windows = load_windows(&self.deps, conn, plan.user_id, from_ms, to_ms).await?;

        let mut updated_ids: Vec<i64> = Vec::new();

        // 被删任务的PLANNED事件直接清掉
        let stale_ids: Vec<i64> = events
            .iter()
            .filter(|e| {
                e.is_movable()
                    && (deleted_task_ids.contains(&e.schedule_task_id)
                        || replace_task_ids.contains(&e.schedule_task_id))
            })
            .map(|e| e.id)
            .collect();
        self.deps.events.delete_by_ids(conn, &stale_ids).await?;
        updated_ids.extend(&stale_ids);

        let tasks = self.deps.tasks.get_by_ids(conn, &replace_task_ids).await?;
        let placeable: Vec<ScheduleTask> = tasks
            .into_iter()
            .filter(|t| t.is_schedulable_in_range(from_ms, to_ms))
            .collect();

        let occupancy: Vec<ScheduleEvent> = events
            .into_iter()
            .filter(|e| !stale_ids.contains(&e.id))
            .collect();
        let slots = free_slots(&windows, &occupancy);
        let (placements, unplaced) = place_tasks(&placeable, slots);

        let task_by_id: HashMap<i64, &ScheduleTask> =
            placeable.iter().map(|t| (t.id, t)).collect();
        let new_events: Vec<ScheduleEvent> = placements
            .iter()
            .map(|p| new_event_from_placement(plan.id, task_by_id[&p.schedule_task_id], p))
            .collect();
        let created = self.deps.events.create_batch(conn, &new_events).await?;
        updated_ids.extend(created.iter().map(|e| e.id));

        let placed_ids: HashSet<i64> =
            placements.iter().map(|p| p.schedule_task_id).collect();
        for task_id in placed_ids {
            self.deps
                .tasks
                .update_schedule_status(conn, task_id, ScheduleTaskStatus::Scheduled, None)
                .await?;
        }
        for task_id in unplaced {
            self.deps
                .tasks
                .update_schedule_status(
                    conn,
                    task_id,
                    ScheduleTaskStatus::Unschedulable,
                    Some("规划范围内没有足够的空闲时段"),
                )
                .await?;
        }

        updated_ids.sort_unstable();
        info!("插入调整完成: 计划 {}, 改动 {} 个事件", plan.id, updated_ids.len());
        Ok(StrategyOutcome {
            success: true,
            updated_event_ids: updated_ids,
            strategy: RescheduleStrategyKind::Insertion,
            duration_ms: started.elapsed().as_millis() as i64,
            score: None,
            error: None,
        })
    }
}

/// 全量重排：可用性假设被推翻时推倒重来，交给外部求解器
pub struct FullReplanStrategy {
    deps: Arc<StrategyDeps>,
}

impl FullReplanStrategy {
    pub fn new(deps: Arc<StrategyDeps>) -> Self {
        Self { deps }
    }

    fn build_request(
        tasks: &[ScheduleTask],
        windows: &[ScheduleWindow],
        immovable: &[ScheduleEvent],
    ) -> OptimizationRequest {
        // 钉住和已完成的事件占掉的时间不交给求解器
        let open = free_slots(windows, immovable);
        let deep_days: HashSet<i64> = windows
            .iter()
            .filter(|w| w.is_deep_work)
            .map(|w| w.date_ms)
            .collect();

        OptimizationRequest {
            tasks: tasks
                .iter()
                .map(|t| TaskInput {
                    task_id: t.id,
                    duration_min: t.duration_min,
                    priority_score: t.priority_score,
                    deadline_ms: t.deadline_ms,
                    earliest_start_ms: t.earliest_start_ms,
                    effort: 1.0,
                    enjoyability: 0.5,
                    dependent_task_ids: t.dependent_task_ids.clone(),
                })
                .collect(),
            windows: open
                .iter()
                .map(|s| Window {
                    date_ms: s.date_ms,
                    start_min: s.start_min,
                    end_min: s.end_min,
                    is_deep_work: deep_days.contains(&s.date_ms),
                })
                .collect(),
            weights: Weights::default(),
            params: Params::default(),
        }
    }
}

#[async_trait]
impl RescheduleStrategy for FullReplanStrategy {
    fn kind(&self) -> RescheduleStrategyKind {
        RescheduleStrategyKind::FullReplan
    }

    #[instrument(skip_all, fields(plan_id = %plan.id))]
    async fn run(
        &self,
        conn: &mut PgConnection,
        plan: &SchedulePlan,
        _batch: &RescheduleBatch,
    ) -> RescheduleResult<StrategyOutcome> {
        let started = Instant::now();
        let (from_ms, to_ms) = plan_horizon(plan);

        let all_tasks = self.deps.tasks.list_by_plan(conn, plan.id).await?;
        let solvable: Vec<ScheduleTask> = all_tasks
            .iter()
            .filter(|t| !t.is_pinned && t.is_schedulable_in_range(from_ms, to_ms))
            .cloned()
            .collect();

        let windows = load_windows(&self.deps, conn, plan.user_id, from_ms, to_ms).await?;
        let events = self
            .deps
            .events
            .list_by_plan_and_range(conn, plan.id, from_ms, to_ms)
            .await?;
        let immovable: Vec<ScheduleEvent> =
            events.iter().filter(|e| !e.is_movable()).cloned().collect();

        let request = Self::build_request(&solvable, &windows, &immovable);
        // 先求解，成功后才碰数据库；求解失败时本次调用不产生任何写入
        let result: PlanResult = self.deps.solver.optimize_with_fallback(&request).await?;

        self.deps
            .events
            .delete_planned_from_date(conn, plan.id, from_ms)
            .await?;

        let task_by_id: HashMap<i64, &ScheduleTask> =
            solvable.iter().map(|t| (t.id, t)).collect();
        let mut new_events = Vec::with_capacity(result.assignments.len());
        for assignment in &result.assignments {
            let task = task_by_id.get(&assignment.task_id).ok_or_else(|| {
                RescheduleError::optimization_error(format!(
                    "求解结果包含未知任务 {}",
                    assignment.task_id
                ))
            })?;
            let now = Utc::now();
            new_events.push(ScheduleEvent {
                id: 0,
                schedule_plan_id: plan.id,
                schedule_task_id: task.id,
                title: task.title.clone(),
                date_ms: assignment.date_ms,
                start_min: assignment.start_min,
                end_min: assignment.end_min,
                part_index: assignment.part_index,
                total_parts: assignment.total_parts,
                status: ScheduleEventStatus::Planned,
                is_pinned: false,
                utility_score: assignment.utility_score,
                created_at: now,
                updated_at: now,
            });
        }
        let created = self.deps.events.create_batch(conn, &new_events).await?;

        let scheduled: HashSet<i64> = result.assignments.iter().map(|a| a.task_id).collect();
        for task_id in &scheduled {
            self.deps
                .tasks
                .update_schedule_status(conn, *task_id, ScheduleTaskStatus::Scheduled, None)
                .await?;
        }
        for missing in &result.un_scheduled {
            self.deps
                .tasks
                .update_schedule_status(
                    conn,
                    missing.task_id,
                    ScheduleTaskStatus::Unschedulable,
                    Some(&missing.reason),
                )
                .await?;
        }

        info!(
            "全量重排完成: 计划 {}, {} 个任务落位, {} 个未排入, 目标值 {:.3}",
            plan.id,
            result.scheduled_count(),
            result.un_scheduled.len(),
            result.objective_score
        );
        Ok(StrategyOutcome {
            success: true,
            updated_event_ids: created.iter().map(|e| e.id).collect(),
            strategy: RescheduleStrategyKind::FullReplan,
            duration_ms: started.elapsed().as_millis() as i64,
            score: Some(result.objective_score),
            error: None,
        })
    }
}

/// 三个策略的注册表，按批次选出的策略派发
pub struct StrategyRegistry {
    ripple: RippleStrategy,
    insertion: InsertionStrategy,
    full_replan: FullReplanStrategy,
}

impl StrategyRegistry {
    pub fn new(deps: Arc<StrategyDeps>) -> Self {
        Self {
            ripple: RippleStrategy::new(deps.clone()),
            insertion: InsertionStrategy::new(deps.clone()),
            full_replan: FullReplanStrategy::new(deps),
        }
    }

    pub fn get(&self, kind: RescheduleStrategyKind) -> &dyn RescheduleStrategy {
        match kind {
            RescheduleStrategyKind::Ripple => &self.ripple,
            RescheduleStrategyKind::Insertion => &self.insertion,
            RescheduleStrategyKind::FullReplan => &self.full_replan,
        }
    }
}
