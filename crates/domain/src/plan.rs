use chrono::{DateTime, Duration, Utc};
use replan_core::{RescheduleError, RescheduleResult};
use serde::{Deserialize, Serialize};

/// 日程计划生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlanStatus {
    #[serde(rename = "DRAFT")]
    Draft,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "PROPOSED")]
    Proposed,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "ARCHIVED")]
    Archived,
    #[serde(rename = "DISCARDED")]
    Discarded,
    #[serde(rename = "FAILED")]
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Processing => "PROCESSING",
            PlanStatus::Proposed => "PROPOSED",
            PlanStatus::Active => "ACTIVE",
            PlanStatus::Completed => "COMPLETED",
            PlanStatus::Archived => "ARCHIVED",
            PlanStatus::Discarded => "DISCARDED",
            PlanStatus::Failed => "FAILED",
        }
    }

    /// 终态没有任何出边
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Archived | PlanStatus::Discarded
        )
    }

    /// 状态机的纯判定函数：同状态、终态出发均不合法
    pub fn can_transition_to(&self, to: PlanStatus) -> bool {
        use PlanStatus::*;
        if self.is_terminal() || *self == to {
            return false;
        }
        matches!(
            (*self, to),
            (Draft, Processing)
                | (Draft, Discarded)
                | (Processing, Proposed)
                | (Processing, Active)
                | (Processing, Failed)
                | (Proposed, Active)
                | (Proposed, Discarded)
                | (Proposed, Processing)
                | (Active, Archived)
                | (Active, Completed)
                | (Active, Processing)
                | (Failed, Processing)
                | (Failed, Discarded)
        )
    }
}

impl sqlx::Type<sqlx::Postgres> for PlanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for PlanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "DRAFT" => Ok(PlanStatus::Draft),
            "PROCESSING" => Ok(PlanStatus::Processing),
            "PROPOSED" => Ok(PlanStatus::Proposed),
            "ACTIVE" => Ok(PlanStatus::Active),
            "COMPLETED" => Ok(PlanStatus::Completed),
            "ARCHIVED" => Ok(PlanStatus::Archived),
            "DISCARDED" => Ok(PlanStatus::Discarded),
            "FAILED" => Ok(PlanStatus::Failed),
            _ => Err(format!("Invalid plan status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for PlanStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 日程计划：每个用户-租户同一时刻至多一个活跃的优化目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePlan {
    pub id: i64,
    pub user_id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub plan_type: String,
    pub start_date_ms: i64,
    pub end_date_ms: Option<i64>,
    pub algorithm: Option<String>,
    pub optimization_score: Option<f64>,
    pub optimized_at: Option<DateTime<Utc>>,
    pub optimization_duration_ms: Option<i64>,
    /// 乐观并发控制版本号
    pub version: i32,
    /// 由归档/克隆形成的谱系
    pub parent_plan_id: Option<i64>,
    pub status: PlanStatus,
    /// 累积的变更信号已使当前优化结果失效
    pub is_stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchedulePlan {
    /// 创建一个滚动计划，覆盖从现在起指定天数
    pub fn new_rolling(user_id: i64, tenant_id: i64, duration_days: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            user_id,
            tenant_id,
            name: format!("Rolling plan {}", now.format("%Y-%m-%d")),
            plan_type: "ROLLING".to_string(),
            start_date_ms: now.timestamp_millis(),
            end_date_ms: Some((now + Duration::days(duration_days)).timestamp_millis()),
            algorithm: None,
            optimization_score: None,
            optimized_at: None,
            optimization_duration_ms: None,
            version: 0,
            parent_plan_id: None,
            status: PlanStatus::Draft,
            is_stale: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, PlanStatus::Active)
    }

    /// 执行一次合法的状态转换；非法转换返回错误且不修改计划
    pub fn transition_to(&mut self, to: PlanStatus) -> RescheduleResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(RescheduleError::invalid_transition(
                self.status.as_str(),
                to.as_str(),
            ));
        }
        self.status = to;
        Ok(())
    }

    pub fn start_optimization(&mut self, algorithm: &str) -> RescheduleResult<()> {
        self.transition_to(PlanStatus::Processing)?;
        self.algorithm = Some(algorithm.to_string());
        Ok(())
    }

    pub fn complete_optimization(&mut self, score: f64, duration_ms: i64) -> RescheduleResult<()> {
        self.transition_to(PlanStatus::Active)?;
        self.optimization_score = Some(score);
        self.optimized_at = Some(Utc::now());
        self.optimization_duration_ms = Some(duration_ms);
        self.is_stale = false;
        Ok(())
    }

    pub fn fail_optimization(&mut self, _reason: &str) {
        // PROCESSING -> FAILED 总是合法；其他状态下保持原状
        let _ = self.transition_to(PlanStatus::Failed);
    }

    pub fn entity_description(&self) -> String {
        format!(
            "日程计划 '{}' (ID: {}, 用户: {}, 状态: {})",
            self.name,
            self.id,
            self.user_id,
            self.status.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlanStatus::*;

    const ALL: [PlanStatus; 8] = [
        Draft, Processing, Proposed, Active, Completed, Archived, Discarded, Failed,
    ];

    fn legal_pairs() -> Vec<(PlanStatus, PlanStatus)> {
        vec![
            (Draft, Processing),
            (Draft, Discarded),
            (Processing, Proposed),
            (Processing, Active),
            (Processing, Failed),
            (Proposed, Active),
            (Proposed, Discarded),
            (Proposed, Processing),
            (Active, Archived),
            (Active, Completed),
            (Active, Processing),
            (Failed, Processing),
            (Failed, Discarded),
        ]
    }

    #[test]
    fn test_transition_table_exhaustive() {
        let legal = legal_pairs();
        for from in ALL {
            for to in ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{} -> {}",
                    from.as_str(),
                    to.as_str()
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_outgoing() {
        for from in [Completed, Archived, Discarded] {
            for to in ALL {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_self_transition_is_illegal() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_transition_to_does_not_mutate_on_error() {
        let mut plan = SchedulePlan::new_rolling(1, 1, 14);
        assert_eq!(plan.status, Draft);
        let err = plan.transition_to(Active);
        assert!(err.is_err());
        assert_eq!(plan.status, Draft);
    }

    #[test]
    fn test_optimization_lifecycle() {
        let mut plan = SchedulePlan::new_rolling(1, 1, 14);
        plan.status = Active;
        plan.is_stale = true;

        plan.start_optimization("HYBRID").unwrap();
        assert_eq!(plan.status, Processing);
        assert_eq!(plan.algorithm.as_deref(), Some("HYBRID"));

        plan.complete_optimization(0.92, 1500).unwrap();
        assert_eq!(plan.status, Active);
        assert!(!plan.is_stale);
        assert_eq!(plan.optimization_duration_ms, Some(1500));
    }

    #[test]
    fn test_fail_optimization_from_processing() {
        let mut plan = SchedulePlan::new_rolling(1, 1, 14);
        plan.status = Processing;
        plan.fail_optimization("solver unavailable");
        assert_eq!(plan.status, Failed);
    }
}
