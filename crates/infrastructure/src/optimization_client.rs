use std::time::Duration;

use async_trait::async_trait;
use replan_core::{OptimizationConfig, RescheduleError, RescheduleResult};
use replan_domain::{OptimizationClient, OptimizationRequest, PlanResult, SolverStrategyType};
use tracing::{debug, instrument, warn};

/// 求解服务的HTTP客户端，每次调用带固定间隔重试
pub struct HttpOptimizationClient {
    client: reqwest::Client,
    base_url: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl HttpOptimizationClient {
    pub fn new(config: &OptimizationConfig) -> RescheduleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RescheduleError::config_error(format!("构建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_count: config.retry_count,
            retry_delay: config.retry_delay(),
        })
    }

    /// 发送一次求解请求并展开响应信封
    async fn post_once(
        &self,
        url: &str,
        request: &OptimizationRequest,
    ) -> RescheduleResult<PlanResult> {
        let response = self.client.post(url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RescheduleError::optimization_error(format!(
                "求解服务返回HTTP {status}"
            )));
        }

        let envelope: replan_domain::SolverResponse = response.json().await?;
        if envelope.code != 200 {
            return Err(RescheduleError::optimization_error(format!(
                "求解服务业务失败: code={}, message={}",
                envelope.code, envelope.message
            )));
        }
        envelope
            .data
            .ok_or_else(|| RescheduleError::optimization_error("求解服务响应缺少data字段"))
    }

    async fn post_with_retry(
        &self,
        url: &str,
        request: &OptimizationRequest,
    ) -> RescheduleResult<PlanResult> {
        let attempts = self.retry_count + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.post_once(url, request).await {
                Ok(result) => {
                    debug!("求解成功: 第 {} 次尝试, {} 个任务落位", attempt, result.scheduled_count());
                    return Ok(result);
                }
                Err(e) => {
                    warn!("求解请求第 {}/{} 次尝试失败: {}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let last = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(RescheduleError::optimization_error(format!(
            "求解请求在 {attempts} 次尝试后仍失败: {last}"
        )))
    }
}

#[async_trait]
impl OptimizationClient for HttpOptimizationClient {
    #[instrument(skip(self, request), fields(
        strategy = %strategy.as_str(),
        tasks = request.tasks.len(),
        windows = request.windows.len(),
    ))]
    async fn optimize(
        &self,
        request: &OptimizationRequest,
        strategy: SolverStrategyType,
    ) -> RescheduleResult<PlanResult> {
        let url = format!(
            "{}/api/v1/optimization/schedule?strategy={}",
            self.base_url,
            strategy.as_str()
        );
        self.post_with_retry(&url, request).await
    }

    #[instrument(skip(self, request), fields(tasks = request.tasks.len()))]
    async fn optimize_with_fallback(
        &self,
        request: &OptimizationRequest,
    ) -> RescheduleResult<PlanResult> {
        let url = format!(
            "{}/api/v1/optimization/schedule-with-fallback",
            self.base_url
        );
        self.post_with_retry(&url, request).await
    }

    async fn health_check(&self) -> RescheduleResult<bool> {
        let url = format!("{}/actuator/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use replan_domain::{Params, Weights};

    use super::*;

    async fn spawn_solver(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn empty_request() -> OptimizationRequest {
        OptimizationRequest {
            tasks: vec![],
            windows: vec![],
            weights: Weights::default(),
            params: Params::default(),
        }
    }

    fn client_for(base_url: String) -> HttpOptimizationClient {
        let config = OptimizationConfig {
            base_url,
            timeout_seconds: 5,
            retry_count: 2,
            retry_delay_ms: 1,
        };
        HttpOptimizationClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_retry_count_bounds_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));

        async fn always_fail(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
            hits.fetch_add(1, Ordering::SeqCst);
            StatusCode::INTERNAL_SERVER_ERROR
        }

        let app = Router::new()
            .route("/api/v1/optimization/schedule", post(always_fail))
            .with_state(hits.clone());
        let base_url = spawn_solver(app).await;

        let client = client_for(base_url);
        let result = client
            .optimize(&empty_request(), SolverStrategyType::CpSat)
            .await;

        assert!(result.is_err());
        // retry_count=2 意味着总共恰好 3 次尝试
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_error_envelope_is_rejected() {
        async fn business_fail() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "code": 500,
                "message": "solver overloaded",
                "data": null
            }))
        }

        let app = Router::new().route(
            "/api/v1/optimization/schedule-with-fallback",
            post(business_fail),
        );
        let base_url = spawn_solver(app).await;

        let client = client_for(base_url);
        let err = client
            .optimize_with_fallback(&empty_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3 次尝试"));
    }

    #[tokio::test]
    async fn test_successful_solve_unwraps_envelope() {
        async fn solve() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "code": 200,
                "message": "success",
                "data": {
                    "assignments": [
                        {"taskId": 1, "dateMs": 0, "startMin": 540, "endMin": 600}
                    ],
                    "unScheduled": [],
                    "objectiveScore": 3.2
                }
            }))
        }

        let app = Router::new().route("/api/v1/optimization/schedule", post(solve));
        let base_url = spawn_solver(app).await;

        let client = client_for(base_url);
        let result = client
            .optimize(&empty_request(), SolverStrategyType::Auto)
            .await
            .unwrap();
        assert!(result.is_fully_scheduled());
        assert_eq!(result.assignments[0].end_min, 600);
    }

    #[tokio::test]
    async fn test_health_check() {
        async fn health() -> StatusCode {
            StatusCode::OK
        }

        let app = Router::new().route("/actuator/health", get(health));
        let base_url = spawn_solver(app).await;

        let client = client_for(base_url);
        assert!(client.health_check().await.unwrap());
    }
}
