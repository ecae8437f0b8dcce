//! 局部落位算法：在不触碰已有事件的前提下把任务填进空闲时段
//!
//! 波纹与插入策略共用这里的纯函数；全量重排交给外部求解器。

use replan_domain::{
    ScheduleEvent, ScheduleEventStatus, ScheduleTask, ScheduleWindow,
};

/// 一段连续的空闲时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSlot {
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
}

impl FreeSlot {
    pub fn duration_min(&self) -> i32 {
        self.end_min - self.start_min
    }
}

/// 任务（或其一个分片）在空闲时段里的落位结果
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub schedule_task_id: i64,
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    pub part_index: i32,
    pub total_parts: i32,
}

/// 从窗口中扣除已占用事件，得到按时间升序的空闲时段
///
/// SKIPPED事件不占时间；其余状态（含钉住、已完成）都视为占用
pub fn free_slots(windows: &[ScheduleWindow], events: &[ScheduleEvent]) -> Vec<FreeSlot> {
    let mut slots = Vec::new();

    for window in windows {
        let mut busy: Vec<(i32, i32)> = events
            .iter()
            .filter(|e| {
                e.date_ms == window.date_ms
                    && e.status != ScheduleEventStatus::Skipped
                    && e.end_min > window.start_min
                    && e.start_min < window.end_min
            })
            .map(|e| (e.start_min.max(window.start_min), e.end_min.min(window.end_min)))
            .collect();
        busy.sort();

        let mut cursor = window.start_min;
        for (start, end) in busy {
            if start > cursor {
                slots.push(FreeSlot {
                    date_ms: window.date_ms,
                    start_min: cursor,
                    end_min: start,
                });
            }
            cursor = cursor.max(end);
        }
        if cursor < window.end_min {
            slots.push(FreeSlot {
                date_ms: window.date_ms,
                start_min: cursor,
                end_min: window.end_min,
            });
        }
    }

    slots.sort_by_key(|s| (s.date_ms, s.start_min));
    slots
}

/// 为单个任务找最早可行的落位
///
/// 优先整块放置；允许拆分的任务在没有足够大的整块时拆成若干
/// 不小于 min_split_min 的分片。放不下返回 None，不产生部分落位。
pub fn place_task(task: &ScheduleTask, slots: &[FreeSlot]) -> Option<Vec<Placement>> {
    let candidates: Vec<&FreeSlot> = slots
        .iter()
        .filter(|s| slot_admits(task, s))
        .collect();

    // 整块优先
    if let Some(slot) = candidates.iter().find(|s| s.duration_min() >= task.duration_min) {
        return Some(vec![Placement {
            schedule_task_id: task.id,
            date_ms: slot.date_ms,
            start_min: slot.start_min,
            end_min: slot.start_min + task.duration_min,
            part_index: 1,
            total_parts: 1,
        }]);
    }

    if !task.allow_split || task.max_split_count <= 1 {
        return None;
    }

    let mut parts = Vec::new();
    let mut remaining = task.duration_min;
    for slot in &candidates {
        if parts.len() as i32 >= task.max_split_count {
            break;
        }
        let take = remaining.min(slot.duration_min());
        if take < task.min_split_min && take < remaining {
            continue;
        }
        parts.push(Placement {
            schedule_task_id: task.id,
            date_ms: slot.date_ms,
            start_min: slot.start_min,
            end_min: slot.start_min + take,
            part_index: 0, // 稍后统一编号
            total_parts: 0,
        });
        remaining -= take;
        if remaining == 0 {
            break;
        }
    }

    if remaining > 0 {
        return None;
    }

    let total = parts.len() as i32;
    for (i, part) in parts.iter_mut().enumerate() {
        part.part_index = i as i32 + 1;
        part.total_parts = total;
    }
    Some(parts)
}

fn slot_admits(task: &ScheduleTask, slot: &FreeSlot) -> bool {
    if let Some(earliest) = task.earliest_start_ms {
        // 粗粒度到天：最早开始日之前的时段不可用
        if slot.date_ms + (slot.end_min as i64) * 60_000 < earliest {
            return false;
        }
    }
    if let Some(deadline) = task.deadline_ms {
        if slot.date_ms + (slot.start_min as i64) * 60_000 > deadline {
            return false;
        }
    }
    true
}

/// 把一组任务按优先级先后依次落位，后放的任务能看到前面占掉的时段
///
/// 返回 (落位结果, 放不下的任务ID)
pub fn place_tasks(
    tasks: &[ScheduleTask],
    slots: Vec<FreeSlot>,
) -> (Vec<Placement>, Vec<i64>) {
    let mut ordered: Vec<&ScheduleTask> = tasks.iter().collect();
    ordered.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.priority_score.total_cmp(&a.priority_score))
    });

    let mut available = slots;
    let mut placements = Vec::new();
    let mut unplaced = Vec::new();

    for task in ordered {
        match place_task(task, &available) {
            Some(parts) => {
                for part in &parts {
                    available = subtract(available, part);
                }
                placements.extend(parts);
            }
            None => unplaced.push(task.id),
        }
    }

    (placements, unplaced)
}

fn subtract(slots: Vec<FreeSlot>, used: &Placement) -> Vec<FreeSlot> {
    let mut out = Vec::with_capacity(slots.len());
    for slot in slots {
        if slot.date_ms != used.date_ms
            || used.end_min <= slot.start_min
            || used.start_min >= slot.end_min
        {
            out.push(slot);
            continue;
        }
        if slot.start_min < used.start_min {
            out.push(FreeSlot {
                date_ms: slot.date_ms,
                start_min: slot.start_min,
                end_min: used.start_min,
            });
        }
        if used.end_min < slot.end_min {
            out.push(FreeSlot {
                date_ms: slot.date_ms,
                start_min: used.end_min,
                end_min: slot.end_min,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use replan_domain::{ScheduleTaskStatus, MS_PER_DAY};

    use super::*;

    fn window(date_ms: i64, start_min: i32, end_min: i32) -> ScheduleWindow {
        ScheduleWindow {
            id: 0,
            user_id: 7,
            date_ms,
            start_min,
            end_min,
            is_deep_work: false,
        }
    }

    fn event(date_ms: i64, start_min: i32, end_min: i32, status: ScheduleEventStatus) -> ScheduleEvent {
        let now = Utc::now();
        ScheduleEvent {
            id: 1,
            schedule_plan_id: 42,
            schedule_task_id: 1,
            title: "busy".to_string(),
            date_ms,
            start_min,
            end_min,
            part_index: 1,
            total_parts: 1,
            status,
            is_pinned: false,
            utility_score: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn task(id: i64, duration_min: i32) -> ScheduleTask {
        let now = Utc::now();
        ScheduleTask {
            id,
            schedule_plan_id: 42,
            task_id: id,
            title: "t".to_string(),
            duration_min,
            priority: 5,
            priority_score: 0.5,
            is_deep_work: false,
            earliest_start_ms: None,
            deadline_ms: None,
            allow_split: false,
            min_split_min: 30,
            max_split_count: 1,
            is_pinned: false,
            status: ScheduleTaskStatus::Unscheduled,
            status_reason: None,
            dependent_task_ids: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_free_slots_subtract_busy_events() {
        let windows = vec![window(0, 540, 1020)];
        let events = vec![
            event(0, 600, 660, ScheduleEventStatus::Planned),
            event(0, 700, 720, ScheduleEventStatus::Completed),
        ];
        let slots = free_slots(&windows, &events);
        assert_eq!(
            slots,
            vec![
                FreeSlot { date_ms: 0, start_min: 540, end_min: 600 },
                FreeSlot { date_ms: 0, start_min: 660, end_min: 700 },
                FreeSlot { date_ms: 0, start_min: 720, end_min: 1020 },
            ]
        );
    }

    #[test]
    fn test_skipped_events_free_their_time() {
        let windows = vec![window(0, 540, 720)];
        let events = vec![event(0, 600, 660, ScheduleEventStatus::Skipped)];
        let slots = free_slots(&windows, &events);
        assert_eq!(slots, vec![FreeSlot { date_ms: 0, start_min: 540, end_min: 720 }]);
    }

    #[test]
    fn test_place_task_prefers_whole_block() {
        let slots = vec![
            FreeSlot { date_ms: 0, start_min: 540, end_min: 570 },
            FreeSlot { date_ms: 0, start_min: 600, end_min: 720 },
        ];
        let parts = place_task(&task(1, 90), &slots).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].start_min, 600);
        assert_eq!(parts[0].end_min, 690);
    }

    #[test]
    fn test_place_task_splits_when_allowed() {
        let slots = vec![
            FreeSlot { date_ms: 0, start_min: 540, end_min: 600 },
            FreeSlot { date_ms: MS_PER_DAY, start_min: 540, end_min: 600 },
        ];
        let mut t = task(1, 90);
        assert!(place_task(&t, &slots).is_none());

        t.allow_split = true;
        t.max_split_count = 2;
        let parts = place_task(&t, &slots).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].total_parts, 2);
        assert_eq!(parts[0].end_min - parts[0].start_min, 60);
        assert_eq!(parts[1].end_min - parts[1].start_min, 30);
        assert_eq!(parts[1].date_ms, MS_PER_DAY);
    }

    #[test]
    fn test_deadline_excludes_late_slots() {
        let slots = vec![
            FreeSlot { date_ms: 0, start_min: 540, end_min: 600 },
            FreeSlot { date_ms: 2 * MS_PER_DAY, start_min: 540, end_min: 600 },
        ];
        let mut t = task(1, 60);
        t.deadline_ms = Some(MS_PER_DAY);
        let parts = place_task(&t, &slots).unwrap();
        assert_eq!(parts[0].date_ms, 0);
    }

    #[test]
    fn test_place_tasks_is_sequential_and_reports_unplaced() {
        let slots = vec![FreeSlot { date_ms: 0, start_min: 540, end_min: 660 }];
        let mut urgent = task(1, 60);
        urgent.priority = 1;
        let filler = task(2, 60);
        let too_big = task(3, 120);

        let (placements, unplaced) =
            place_tasks(&[filler.clone(), too_big.clone(), urgent.clone()], slots);

        // 紧急任务先占 540-600，第二个任务接 600-660，大任务放不下
        assert_eq!(placements.len(), 2);
        assert_eq!(placements[0].schedule_task_id, 1);
        assert_eq!(placements[0].start_min, 540);
        assert_eq!(placements[1].schedule_task_id, 2);
        assert_eq!(placements[1].start_min, 600);
        assert_eq!(unplaced, vec![3]);
    }
}
