use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 日程任务的排程状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleTaskStatus {
    #[serde(rename = "UNSCHEDULED")]
    Unscheduled,
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "UNSCHEDULABLE")]
    Unschedulable,
}

impl ScheduleTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleTaskStatus::Unscheduled => "UNSCHEDULED",
            ScheduleTaskStatus::Scheduled => "SCHEDULED",
            ScheduleTaskStatus::Completed => "COMPLETED",
            ScheduleTaskStatus::Unschedulable => "UNSCHEDULABLE",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ScheduleTaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ScheduleTaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "UNSCHEDULED" => Ok(ScheduleTaskStatus::Unscheduled),
            "SCHEDULED" => Ok(ScheduleTaskStatus::Scheduled),
            "COMPLETED" => Ok(ScheduleTaskStatus::Completed),
            "UNSCHEDULABLE" => Ok(ScheduleTaskStatus::Unschedulable),
            _ => Err(format!("Invalid schedule task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ScheduleTaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 待排程的任务（由外部任务服务同步进来，排程引擎只读写排程相关字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleTask {
    pub id: i64,
    pub schedule_plan_id: i64,
    /// 外部任务服务中的原始任务ID
    pub task_id: i64,
    pub title: String,
    pub duration_min: i32,
    pub priority: i32,
    pub priority_score: f64,
    pub is_deep_work: bool,
    pub earliest_start_ms: Option<i64>,
    pub deadline_ms: Option<i64>,
    pub allow_split: bool,
    pub min_split_min: i32,
    pub max_split_count: i32,
    pub is_pinned: bool,
    pub status: ScheduleTaskStatus,
    pub status_reason: Option<String>,
    pub dependent_task_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleTask {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, ScheduleTaskStatus::Completed)
    }

    /// 是否在给定日期范围内可参与排程
    pub fn is_schedulable_in_range(&self, from_ms: i64, to_ms: i64) -> bool {
        if self.is_completed() || self.duration_min <= 0 {
            return false;
        }
        if let Some(deadline) = self.deadline_ms {
            if deadline < from_ms {
                return false;
            }
        }
        if let Some(earliest) = self.earliest_start_ms {
            if earliest > to_ms {
                return false;
            }
        }
        true
    }
}

/// 日程事件状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleEventStatus {
    #[serde(rename = "PLANNED")]
    Planned,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl ScheduleEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleEventStatus::Planned => "PLANNED",
            ScheduleEventStatus::Completed => "COMPLETED",
            ScheduleEventStatus::Skipped => "SKIPPED",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ScheduleEventStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ScheduleEventStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "PLANNED" => Ok(ScheduleEventStatus::Planned),
            "COMPLETED" => Ok(ScheduleEventStatus::Completed),
            "SKIPPED" => Ok(ScheduleEventStatus::Skipped),
            _ => Err(format!("Invalid schedule event status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ScheduleEventStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 排程产出的具体事件：某任务（或其一个分片）在某天某时段的安排
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub id: i64,
    pub schedule_plan_id: i64,
    pub schedule_task_id: i64,
    pub title: String,
    /// 当天零点的毫秒时间戳
    pub date_ms: i64,
    /// 当天起始分钟
    pub start_min: i32,
    /// 当天结束分钟
    pub end_min: i32,
    pub part_index: i32,
    pub total_parts: i32,
    pub status: ScheduleEventStatus,
    /// 钉住的事件不被任何策略移动
    pub is_pinned: bool,
    pub utility_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleEvent {
    pub fn is_movable(&self) -> bool {
        !self.is_pinned && matches!(self.status, ScheduleEventStatus::Planned)
    }

    pub fn duration_min(&self) -> i32 {
        self.end_min - self.start_min
    }
}

/// 用户某天的可用时间窗口
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub id: i64,
    pub user_id: i64,
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    /// 深度工作时段，求解器会倾向于把深度任务放进来
    pub is_deep_work: bool,
}

pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
const DEFAULT_WINDOW_START_MIN: i32 = 540; // 09:00
const DEFAULT_WINDOW_END_MIN: i32 = 1020; // 17:00

/// 用户未配置可用性时的兜底窗口：范围内每天 09:00-17:00
pub fn default_windows(user_id: i64, from_ms: i64, to_ms: i64) -> Vec<ScheduleWindow> {
    let mut windows = Vec::new();
    let mut date_ms = from_ms - from_ms.rem_euclid(MS_PER_DAY);
    while date_ms <= to_ms {
        windows.push(ScheduleWindow {
            id: 0,
            user_id,
            date_ms,
            start_min: DEFAULT_WINDOW_START_MIN,
            end_min: DEFAULT_WINDOW_END_MIN,
            is_deep_work: false,
        });
        date_ms += MS_PER_DAY;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> ScheduleTask {
        let now = Utc::now();
        ScheduleTask {
            id: 1,
            schedule_plan_id: 42,
            task_id: 100,
            title: "write report".to_string(),
            duration_min: 60,
            priority: 3,
            priority_score: 0.7,
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
    fn test_completed_task_is_not_schedulable() {
        let mut t = task();
        t.status = ScheduleTaskStatus::Completed;
        assert!(!t.is_schedulable_in_range(0, MS_PER_DAY));
    }

    #[test]
    fn test_expired_deadline_excludes_task() {
        let mut t = task();
        t.deadline_ms = Some(100);
        assert!(!t.is_schedulable_in_range(MS_PER_DAY, 2 * MS_PER_DAY));
        assert!(t.is_schedulable_in_range(0, MS_PER_DAY));
    }

    #[test]
    fn test_default_windows_cover_range() {
        let windows = default_windows(7, 0, 3 * MS_PER_DAY);
        assert_eq!(windows.len(), 4);
        assert!(windows.iter().all(|w| w.start_min == 540 && w.end_min == 1020));
    }

    #[test]
    fn test_pinned_event_is_not_movable() {
        let now = Utc::now();
        let event = ScheduleEvent {
            id: 1,
            schedule_plan_id: 42,
            schedule_task_id: 1,
            title: "x".to_string(),
            date_ms: 0,
            start_min: 540,
            end_min: 600,
            part_index: 1,
            total_parts: 1,
            status: ScheduleEventStatus::Planned,
            is_pinned: true,
            utility_score: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!event.is_movable());
        assert_eq!(event.duration_min(), 60);
    }
}
