use std::sync::Arc;

use anyhow::{Context, Result};
use replan_core::AppConfig;
use replan_domain::OptimizationClient;
use replan_engine::{RescheduleWorker, RetentionSweeper, StrategyDeps, StrategyRegistry};
use replan_infrastructure::{
    create_pool, HttpOptimizationClient, PostgresEventRepository, PostgresPlanRepository,
    PostgresQueueRepository, PostgresTaskRepository, PostgresWindowRepository,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 主应用：装配仓储、求解客户端、工作器与清理任务
pub struct Application {
    worker: RescheduleWorker,
    sweeper: RetentionSweeper,
    solver: Arc<dyn OptimizationClient>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let pool = create_pool(&config.database)
            .await
            .context("创建数据库连接池失败")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("执行数据库迁移失败")?;

        let queue_repo = Arc::new(PostgresQueueRepository::new(pool.clone()));
        let plan_repo = Arc::new(PostgresPlanRepository::new(pool.clone()));
        let solver: Arc<dyn OptimizationClient> = Arc::new(
            HttpOptimizationClient::new(&config.optimization).context("创建求解客户端失败")?,
        );

        let deps = Arc::new(StrategyDeps {
            tasks: Arc::new(PostgresTaskRepository::new(pool.clone())),
            events: Arc::new(PostgresEventRepository::new(pool.clone())),
            windows: Arc::new(PostgresWindowRepository::new(pool.clone())),
            solver: solver.clone(),
        });

        let worker = RescheduleWorker::new(
            pool.clone(),
            queue_repo.clone(),
            plan_repo,
            StrategyRegistry::new(deps),
            config.worker.clone(),
        );
        let sweeper = RetentionSweeper::new(queue_repo, config.retention.clone());

        Ok(Self {
            worker,
            sweeper,
            solver,
        })
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.solver.health_check().await {
            Ok(true) => info!("求解服务健康检查通过"),
            Ok(false) => warn!("求解服务不健康，全量重排会在重试后失败"),
            Err(e) => warn!("求解服务不可达: {e}"),
        }

        let worker_handle = self.worker.start();
        let sweeper_handle = self.sweeper.start();
        info!("所有后台组件已启动");

        let _ = shutdown_rx.recv().await;

        self.worker.stop();
        self.sweeper.stop();
        let _ = worker_handle.await;
        let _ = sweeper_handle.await;
        Ok(())
    }
}
