//! 优化求解服务的线上契约
//!
//! 字段名必须与求解服务的JSON约定逐一对应，不要改动serde重命名。

use async_trait::async_trait;
use replan_core::RescheduleResult;
use serde::{Deserialize, Serialize};

/// 求解算法策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SolverStrategyType {
    #[serde(rename = "CP_SAT")]
    CpSat,
    #[serde(rename = "MILP")]
    Milp,
    #[serde(rename = "HEURISTIC")]
    Heuristic,
    #[serde(rename = "LOCAL_SEARCH")]
    LocalSearch,
    #[serde(rename = "AUTO")]
    Auto,
}

impl SolverStrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverStrategyType::CpSat => "CP_SAT",
            SolverStrategyType::Milp => "MILP",
            SolverStrategyType::Heuristic => "HEURISTIC",
            SolverStrategyType::LocalSearch => "LOCAL_SEARCH",
            SolverStrategyType::Auto => "AUTO",
        }
    }
}

/// 提交给求解服务的单个任务
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub task_id: i64,
    pub duration_min: i32,
    pub priority_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest_start_ms: Option<i64>,
    #[serde(default = "default_effort")]
    pub effort: f64,
    #[serde(default = "default_enjoyability")]
    pub enjoyability: f64,
    #[serde(default)]
    pub dependent_task_ids: Vec<i64>,
}

fn default_effort() -> f64 {
    1.0
}

fn default_enjoyability() -> f64 {
    0.5
}

/// 可用时间窗口
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    #[serde(default)]
    pub is_deep_work: bool,
}

/// 目标函数各分量权重
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weights {
    pub priority: f64,
    pub deadline: f64,
    pub context_switch: f64,
    pub fragmentation: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            priority: 1.0,
            deadline: 1.0,
            context_switch: 0.3,
            fragmentation: 0.2,
        }
    }
}

/// 求解参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    pub slot_min: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_sec: Option<i64>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            slot_min: 15,
            max_time_sec: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRequest {
    pub tasks: Vec<TaskInput>,
    pub windows: Vec<Window>,
    pub weights: Weights,
    pub params: Params,
}

/// 求解服务统一响应信封，code为200表示业务成功
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverResponse {
    pub code: i32,
    pub message: String,
    pub data: Option<PlanResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(rename = "unScheduled", default)]
    pub un_scheduled: Vec<UnscheduledTask>,
    #[serde(default)]
    pub objective_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solve_time_ms: Option<i64>,
}

impl PlanResult {
    pub fn is_fully_scheduled(&self) -> bool {
        self.un_scheduled.is_empty()
    }

    pub fn scheduled_count(&self) -> usize {
        self.assignments.len()
    }
}

/// 单个任务分片在时间轴上的落位
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub task_id: i64,
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    #[serde(default = "default_part_index")]
    pub part_index: i32,
    #[serde(default = "default_total_parts")]
    pub total_parts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utility_score: Option<f64>,
}

fn default_part_index() -> i32 {
    1
}

fn default_total_parts() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduledTask {
    pub task_id: i64,
    pub reason: String,
}

/// 优化求解服务的访问端口
#[async_trait]
pub trait OptimizationClient: Send + Sync {
    /// 以指定策略求解
    async fn optimize(
        &self,
        request: &OptimizationRequest,
        strategy: SolverStrategyType,
    ) -> RescheduleResult<PlanResult>;

    /// 由服务端自动降级选择策略求解
    async fn optimize_with_fallback(
        &self,
        request: &OptimizationRequest,
    ) -> RescheduleResult<PlanResult>;

    /// 求解服务健康探测
    async fn health_check(&self) -> RescheduleResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = OptimizationRequest {
            tasks: vec![TaskInput {
                task_id: 7,
                duration_min: 90,
                priority_score: 0.8,
                deadline_ms: Some(1_700_000_000_000),
                earliest_start_ms: None,
                effort: 1.0,
                enjoyability: 0.5,
                dependent_task_ids: vec![3],
            }],
            windows: vec![Window {
                date_ms: 1_699_920_000_000,
                start_min: 540,
                end_min: 1020,
                is_deep_work: true,
            }],
            weights: Weights::default(),
            params: Params::default(),
        };

        let json = serde_json::to_value(&request).unwrap();
        let task = &json["tasks"][0];
        assert_eq!(task["taskId"], 7);
        assert_eq!(task["durationMin"], 90);
        assert_eq!(task["priorityScore"], 0.8);
        assert_eq!(task["deadlineMs"], 1_700_000_000_000i64);
        assert!(task.get("earliestStartMs").is_none());
        assert_eq!(task["dependentTaskIds"][0], 3);

        let window = &json["windows"][0];
        assert_eq!(window["dateMs"], 1_699_920_000_000i64);
        assert_eq!(window["startMin"], 540);
        assert_eq!(window["endMin"], 1020);
        assert_eq!(window["isDeepWork"], true);

        assert_eq!(json["params"]["slotMin"], 15);
    }

    #[test]
    fn test_response_envelope_decoding() {
        let body = serde_json::json!({
            "code": 200,
            "message": "success",
            "data": {
                "assignments": [
                    {"taskId": 7, "dateMs": 1699920000000i64, "startMin": 540,
                     "endMin": 630, "partIndex": 1, "totalParts": 2, "utilityScore": 0.91}
                ],
                "unScheduled": [
                    {"taskId": 9, "reason": "no available window before deadline"}
                ],
                "objectiveScore": 12.5,
                "strategy": "CP_SAT"
            }
        });

        let response: SolverResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.code, 200);
        let result = response.data.unwrap();
        assert_eq!(result.scheduled_count(), 1);
        assert!(!result.is_fully_scheduled());
        assert_eq!(result.assignments[0].total_parts, 2);
        assert_eq!(result.un_scheduled[0].task_id, 9);
    }

    #[test]
    fn test_strategy_wire_names() {
        assert_eq!(SolverStrategyType::CpSat.as_str(), "CP_SAT");
        assert_eq!(
            serde_json::to_string(&SolverStrategyType::LocalSearch).unwrap(),
            "\"LOCAL_SEARCH\""
        );
    }
}
