use chrono::{DateTime, Duration, Utc};
use replan_core::RescheduleResult;
use serde::{Deserialize, Serialize};

/// 去抖窗口：信号落队后至少等待这么久才可被处理，以合并连续重复信号
pub const DEBOUNCE_WINDOW_MS: i64 = 300;
/// 去抖上限：同一实体被持续重触发时，最迟在首次入队后这么久必须可被处理
pub const MAX_DEBOUNCE_WAIT_MS: i64 = 2_000;

/// 变更信号类型，自带紧急度等级（数值越小越紧急）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TriggerType {
    #[serde(rename = "MANUAL_DRAG")]
    ManualDrag,
    #[serde(rename = "EVENT_SPLIT")]
    EventSplit,
    #[serde(rename = "EVENT_COMPLETE")]
    EventComplete,
    #[serde(rename = "EVENT_SKIP")]
    EventSkip,
    #[serde(rename = "CONSTRAINT_CHANGE")]
    ConstraintChange,
    #[serde(rename = "TASK_ADDED")]
    TaskAdded,
    #[serde(rename = "TASK_DELETED")]
    TaskDeleted,
    #[serde(rename = "AVAILABILITY_CHANGE")]
    AvailabilityChange,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::ManualDrag => "MANUAL_DRAG",
            TriggerType::EventSplit => "EVENT_SPLIT",
            TriggerType::EventComplete => "EVENT_COMPLETE",
            TriggerType::EventSkip => "EVENT_SKIP",
            TriggerType::ConstraintChange => "CONSTRAINT_CHANGE",
            TriggerType::TaskAdded => "TASK_ADDED",
            TriggerType::TaskDeleted => "TASK_DELETED",
            TriggerType::AvailabilityChange => "AVAILABILITY_CHANGE",
        }
    }

    /// 固有紧急度等级
    pub fn urgency_rank(&self) -> i32 {
        match self {
            TriggerType::ManualDrag => 1,
            TriggerType::EventSplit | TriggerType::EventComplete | TriggerType::EventSkip => 2,
            TriggerType::ConstraintChange | TriggerType::TaskAdded | TriggerType::TaskDeleted => 5,
            TriggerType::AvailabilityChange => 9,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TriggerType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TriggerType {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "MANUAL_DRAG" => Ok(TriggerType::ManualDrag),
            "EVENT_SPLIT" => Ok(TriggerType::EventSplit),
            "EVENT_COMPLETE" => Ok(TriggerType::EventComplete),
            "EVENT_SKIP" => Ok(TriggerType::EventSkip),
            "CONSTRAINT_CHANGE" => Ok(TriggerType::ConstraintChange),
            "TASK_ADDED" => Ok(TriggerType::TaskAdded),
            "TASK_DELETED" => Ok(TriggerType::TaskDeleted),
            "AVAILABILITY_CHANGE" => Ok(TriggerType::AvailabilityChange),
            _ => Err(format!("Invalid trigger type: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TriggerType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 队列条目处理状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueItemStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "PENDING",
            QueueItemStatus::Processing => "PROCESSING",
            QueueItemStatus::Completed => "COMPLETED",
            QueueItemStatus::Failed => "FAILED",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for QueueItemStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for QueueItemStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "PENDING" => Ok(QueueItemStatus::Pending),
            "PROCESSING" => Ok(QueueItemStatus::Processing),
            "COMPLETED" => Ok(QueueItemStatus::Completed),
            "FAILED" => Ok(QueueItemStatus::Failed),
            _ => Err(format!("Invalid queue item status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for QueueItemStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 按触发类型区分的变更载荷，在策略消费处解码
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangePayload {
    ManualDrag {
        event_id: i64,
        date_ms: i64,
        start_min: i32,
        end_min: i32,
    },
    EventSplit {
        event_id: i64,
        split_at_min: i32,
    },
    EventComplete {
        event_id: i64,
    },
    EventSkip {
        event_id: i64,
    },
    ConstraintChange {
        schedule_task_id: i64,
    },
    TaskAdded {
        schedule_task_id: i64,
    },
    TaskDeleted {
        schedule_task_id: i64,
    },
    AvailabilityChange {
        from_date_ms: i64,
        to_date_ms: i64,
    },
}

impl ChangePayload {
    pub fn schedule_task_id(&self) -> Option<i64> {
        match self {
            ChangePayload::ConstraintChange { schedule_task_id }
            | ChangePayload::TaskAdded { schedule_task_id }
            | ChangePayload::TaskDeleted { schedule_task_id } => Some(*schedule_task_id),
            _ => None,
        }
    }

    pub fn event_id(&self) -> Option<i64> {
        match self {
            ChangePayload::ManualDrag { event_id, .. }
            | ChangePayload::EventSplit { event_id, .. }
            | ChangePayload::EventComplete { event_id }
            | ChangePayload::EventSkip { event_id } => Some(*event_id),
            _ => None,
        }
    }
}

/// 计算去抖截止时间：now + 窗口，但不得超过 first_created_at + 上限
pub fn compute_debounce_until(
    now: DateTime<Utc>,
    first_created_at: DateTime<Utc>,
) -> DateTime<Utc> {
    let armed = now + Duration::milliseconds(DEBOUNCE_WINDOW_MS);
    let cap = first_created_at + Duration::milliseconds(MAX_DEBOUNCE_WAIT_MS);
    armed.min(cap)
}

/// 一条待处理或已处理的变更信号
///
/// 唯一键 (schedule_plan_id, trigger_type, entity_id)：同一实体的重复信号
/// 合并进已有行而不是产生新行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleQueueItem {
    pub id: i64,
    pub user_id: i64,
    pub schedule_plan_id: i64,
    pub trigger_type: TriggerType,
    pub entity_type: String,
    pub entity_id: i64,
    pub change_payload: serde_json::Value,
    pub status: QueueItemStatus,
    pub priority: i32,
    pub debounce_until: DateTime<Utc>,
    /// 首次入队时间，用于限制无限去抖
    pub first_created_at: DateTime<Utc>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RescheduleQueueItem {
    pub fn new(
        user_id: i64,
        schedule_plan_id: i64,
        trigger_type: TriggerType,
        entity_type: &str,
        entity_id: i64,
        payload: &ChangePayload,
    ) -> RescheduleResult<Self> {
        let now = Utc::now();
        Ok(Self {
            id: 0, // 将由数据库生成
            user_id,
            schedule_plan_id,
            trigger_type,
            entity_type: entity_type.to_string(),
            entity_id,
            change_payload: serde_json::to_value(payload)?,
            status: QueueItemStatus::Pending,
            priority: trigger_type.urgency_rank(),
            debounce_until: compute_debounce_until(now, now),
            first_created_at: now,
            retry_count: 0,
            error_message: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 在策略边界将原始载荷解码为具体结构
    pub fn payload(&self) -> RescheduleResult<ChangePayload> {
        Ok(serde_json::from_value(self.change_payload.clone())?)
    }
}

/// 重排策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RescheduleStrategyKind {
    #[serde(rename = "RIPPLE")]
    Ripple,
    #[serde(rename = "INSERTION")]
    Insertion,
    #[serde(rename = "FULL_REPLAN")]
    FullReplan,
}

impl RescheduleStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RescheduleStrategyKind::Ripple => "RIPPLE",
            RescheduleStrategyKind::Insertion => "INSERTION",
            RescheduleStrategyKind::FullReplan => "FULL_REPLAN",
        }
    }
}

/// 一次工作轮中为某个计划认领的全部队列条目（内存态，不落库）
#[derive(Debug, Clone)]
pub struct RescheduleBatch {
    pub plan_id: i64,
    pub user_id: i64,
    pub items: Vec<RescheduleQueueItem>,
}

impl RescheduleBatch {
    pub fn new(plan_id: i64, items: Vec<RescheduleQueueItem>) -> Self {
        let user_id = items.first().map(|i| i.user_id).unwrap_or_default();
        Self {
            plan_id,
            user_id,
            items,
        }
    }

    pub fn item_ids(&self) -> Vec<i64> {
        self.items.iter().map(|i| i.id).collect()
    }

    /// 策略选择：批中存在的触发类型的纯函数
    ///
    /// 在能够覆盖最紧急触发的前提下选最便宜的策略；全量重排只留给
    /// 推翻了可用性假设的变更
    pub fn determine_strategy(&self) -> RescheduleStrategyKind {
        use TriggerType::*;
        let has = |pred: fn(&TriggerType) -> bool| self.items.iter().any(|i| pred(&i.trigger_type));

        if has(|t| matches!(t, ManualDrag | EventSplit | EventComplete | EventSkip)) {
            RescheduleStrategyKind::Ripple
        } else if has(|t| matches!(t, ConstraintChange | TaskAdded | TaskDeleted)) {
            RescheduleStrategyKind::Insertion
        } else {
            RescheduleStrategyKind::FullReplan
        }
    }

    /// 批内受影响的任务ID（任务类触发）
    pub fn affected_task_ids(&self) -> Vec<i64> {
        self.items
            .iter()
            .filter_map(|i| i.payload().ok().and_then(|p| p.schedule_task_id()))
            .collect()
    }

    /// 批内受影响的事件ID（事件类触发）
    pub fn affected_event_ids(&self) -> Vec<i64> {
        self.items
            .iter()
            .filter_map(|i| i.payload().ok().and_then(|p| p.event_id()))
            .collect()
    }
}

/// 一次策略执行的瞬态结果
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub success: bool,
    pub updated_event_ids: Vec<i64>,
    pub strategy: RescheduleStrategyKind,
    pub duration_ms: i64,
    /// 全量重排时求解器给出的目标函数值
    pub score: Option<f64>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(trigger: TriggerType, entity_id: i64) -> RescheduleQueueItem {
        let payload = match trigger {
            TriggerType::ManualDrag => ChangePayload::ManualDrag {
                event_id: entity_id,
                date_ms: 0,
                start_min: 540,
                end_min: 600,
            },
            TriggerType::TaskAdded => ChangePayload::TaskAdded {
                schedule_task_id: entity_id,
            },
            TriggerType::AvailabilityChange => ChangePayload::AvailabilityChange {
                from_date_ms: 0,
                to_date_ms: 0,
            },
            TriggerType::EventComplete => ChangePayload::EventComplete {
                event_id: entity_id,
            },
            _ => ChangePayload::ConstraintChange {
                schedule_task_id: entity_id,
            },
        };
        RescheduleQueueItem::new(7, 42, trigger, "event", entity_id, &payload).unwrap()
    }

    #[test]
    fn test_urgency_ranks() {
        assert_eq!(TriggerType::ManualDrag.urgency_rank(), 1);
        assert_eq!(TriggerType::EventSplit.urgency_rank(), 2);
        assert_eq!(TriggerType::TaskAdded.urgency_rank(), 5);
        assert_eq!(TriggerType::AvailabilityChange.urgency_rank(), 9);
    }

    #[test]
    fn test_availability_only_batch_selects_full_replan() {
        let batch = RescheduleBatch::new(42, vec![item(TriggerType::AvailabilityChange, 1)]);
        assert_eq!(
            batch.determine_strategy(),
            RescheduleStrategyKind::FullReplan
        );
    }

    #[test]
    fn test_most_urgent_trigger_wins() {
        // manual-drag 和 task-added 混合时，更紧急的 drag 决定策略
        let batch = RescheduleBatch::new(
            42,
            vec![item(TriggerType::ManualDrag, 1), item(TriggerType::TaskAdded, 2)],
        );
        assert_eq!(batch.determine_strategy(), RescheduleStrategyKind::Ripple);
    }

    #[test]
    fn test_task_triggers_select_insertion() {
        let batch = RescheduleBatch::new(
            42,
            vec![
                item(TriggerType::TaskAdded, 1),
                item(TriggerType::ConstraintChange, 2),
            ],
        );
        assert_eq!(batch.determine_strategy(), RescheduleStrategyKind::Insertion);
    }

    #[test]
    fn test_mixed_availability_and_tasks_selects_insertion() {
        let batch = RescheduleBatch::new(
            42,
            vec![
                item(TriggerType::AvailabilityChange, 1),
                item(TriggerType::TaskDeleted, 2),
            ],
        );
        assert_eq!(batch.determine_strategy(), RescheduleStrategyKind::Insertion);
    }

    #[test]
    fn test_debounce_until_is_rearmed_but_capped() {
        let first = Utc::now();
        // 刚入队时：窗口不受上限约束
        let armed = compute_debounce_until(first, first);
        assert_eq!(armed, first + Duration::milliseconds(DEBOUNCE_WINDOW_MS));

        // 持续重触发 1.9 秒后：重新武装会超过上限，被截断
        let later = first + Duration::milliseconds(1_900);
        let capped = compute_debounce_until(later, first);
        assert_eq!(capped, first + Duration::milliseconds(MAX_DEBOUNCE_WAIT_MS));
    }

    #[test]
    fn test_payload_roundtrip_at_strategy_boundary() {
        let it = item(TriggerType::ManualDrag, 99);
        match it.payload().unwrap() {
            ChangePayload::ManualDrag {
                event_id, end_min, ..
            } => {
                assert_eq!(event_id, 99);
                assert_eq!(end_min, 600);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_batch_collects_affected_entities() {
        let batch = RescheduleBatch::new(
            42,
            vec![item(TriggerType::TaskAdded, 5), item(TriggerType::EventComplete, 8)],
        );
        assert_eq!(batch.affected_task_ids(), vec![5]);
        assert_eq!(batch.affected_event_ids(), vec![8]);
        assert_eq!(batch.user_id, 7);
    }
}
