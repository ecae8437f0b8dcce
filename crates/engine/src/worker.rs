//! 轮询工作器：发现脏计划，认领并在单个事务内完成一次重排

use std::sync::Arc;

use chrono::{Duration, Utc};
use replan_core::{RescheduleError, RescheduleResult, WorkerConfig};
use replan_domain::{
    QueueItemStatus, RescheduleBatch, RescheduleQueueRepository, SchedulePlanRepository,
    StrategyOutcome, DEBOUNCE_WINDOW_MS,
};
use sqlx::{Acquire, PgPool};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::claim_table::PlanClaimTable;
use crate::strategies::StrategyRegistry;

struct WorkerInner {
    pool: PgPool,
    queue: Arc<dyn RescheduleQueueRepository>,
    plans: Arc<dyn SchedulePlanRepository>,
    strategies: StrategyRegistry,
    claims: PlanClaimTable,
    config: WorkerConfig,
}

pub struct RescheduleWorker {
    inner: Arc<WorkerInner>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RescheduleWorker {
    pub fn new(
        pool: PgPool,
        queue: Arc<dyn RescheduleQueueRepository>,
        plans: Arc<dyn SchedulePlanRepository>,
        strategies: StrategyRegistry,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(WorkerInner {
                pool,
                queue,
                plans,
                strategies,
                claims: PlanClaimTable::new(),
                config,
            }),
            shutdown_tx,
        }
    }

    /// 启动轮询循环，返回可等待的句柄
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.poll_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut inflight: JoinSet<()> = JoinSet::new();

            info!(
                "重排工作器启动: 轮询间隔 {:?}, 每轮最多 {} 个计划",
                inner.config.poll_interval(),
                inner.config.max_plans_per_poll
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        while inflight.try_join_next().is_some() {}
                        if let Err(e) = Self::poll_once(&inner, &mut inflight).await {
                            if e.is_fatal() {
                                error!("轮询遇到不可恢复错误, 工作器退出: {}", e);
                                break;
                            }
                            error!("轮询失败: {}", e);
                        }
                    }
                }
            }

            // 收到停机信号后等在途的计划处理完
            info!("重排工作器停机中, 在途计划 {} 个", inner.claims.active_count());
            while inflight.join_next().await.is_some() {}
            info!("重排工作器已停止");
        })
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn poll_once(
        inner: &Arc<WorkerInner>,
        inflight: &mut JoinSet<()>,
    ) -> RescheduleResult<()> {
        let now = Utc::now();
        let plan_ids = inner
            .queue
            .dirty_plan_ids(now, inner.config.max_plans_per_poll)
            .await?;
        if plan_ids.is_empty() {
            return Ok(());
        }
        debug!("发现 {} 个脏计划: {:?}", plan_ids.len(), plan_ids);

        for plan_id in plan_ids {
            if !inner.claims.try_claim(plan_id) {
                debug!("计划 {} 仍在处理中, 跳过", plan_id);
                continue;
            }
            let inner = inner.clone();
            inflight.spawn(async move {
                if let Err(e) = Self::process_plan(&inner, plan_id).await {
                    error!("处理计划 {} 失败: {}", plan_id, e);
                }
                inner.claims.release(plan_id);
            });
        }
        Ok(())
    }

    /// 认领、选策略、执行、回写，整个批次一个事务
    #[instrument(skip(inner))]
    async fn process_plan(inner: &WorkerInner, plan_id: i64) -> RescheduleResult<()> {
        let now = Utc::now();
        let mut tx = inner.pool.begin().await?;

        let items = inner
            .queue
            .fetch_and_lock_batch(&mut tx, plan_id, now)
            .await?;
        if items.is_empty() {
            // 并发工作器抢先认领了这些条目
            tx.commit().await?;
            return Ok(());
        }

        let batch = RescheduleBatch::new(plan_id, items);
        let item_ids = batch.item_ids();
        inner.queue.mark_processing(&mut tx, &item_ids).await?;

        let mut plan = inner.plans.get_by_id(plan_id).await?;
        if plan.status.is_terminal() {
            // 终态计划不再重排，批次直接出队
            inner
                .queue
                .update_batch_status(
                    &mut tx,
                    &item_ids,
                    QueueItemStatus::Failed,
                    Some("计划已进入终态"),
                )
                .await?;
            tx.commit().await?;
            warn!("计划 {} 处于终态 {}, 丢弃 {} 个信号", plan_id, plan.status.as_str(), item_ids.len());
            return Ok(());
        }

        let kind = batch.determine_strategy();
        info!(
            "计划 {} 的批次: {} 个信号, 选用策略 {}",
            plan_id,
            batch.items.len(),
            kind.as_str()
        );

        // 崩溃恢复后计划可能遗留在PROCESSING，直接接管而不再转换
        if plan.status != replan_domain::PlanStatus::Processing {
            plan.start_optimization(kind.as_str())?;
        } else {
            plan.algorithm = Some(kind.as_str().to_string());
        }
        let mut plan = inner.plans.update_with_version(&plan).await?;

        // 策略写入落在保存点里：失败只回滚策略本身的写入，
        // 批次的行锁与PROCESSING标记由外层事务一直持有到记账提交，
        // 其他实例在此期间认领不到这些条目
        let strategy = inner.strategies.get(kind);
        let run_result = {
            let mut sp = tx.begin().await?;
            match strategy.run(&mut sp, &plan, &batch).await {
                Ok(outcome) => {
                    sp.commit().await?;
                    Ok(outcome)
                }
                Err(e) => {
                    sp.rollback().await?;
                    Err(e)
                }
            }
        };

        match run_result {
            Ok(outcome) => {
                inner
                    .queue
                    .update_batch_status(&mut tx, &item_ids, QueueItemStatus::Completed, None)
                    .await?;
                tx.commit().await?;
                Self::record_success(inner, &mut plan, &outcome).await?;
                Ok(())
            }
            Err(e) => {
                Self::record_failure(inner, &mut tx, &batch, &e).await?;
                tx.commit().await?;
                plan.fail_optimization(&e.to_string());
                if let Err(update_err) = inner.plans.update_with_version(&plan).await {
                    warn!("计划 {} 失败状态回写未成功: {}", plan_id, update_err);
                }
                Err(e)
            }
        }
    }

    async fn record_success(
        inner: &WorkerInner,
        plan: &mut replan_domain::SchedulePlan,
        outcome: &StrategyOutcome,
    ) -> RescheduleResult<()> {
        let score = outcome.score.or(plan.optimization_score).unwrap_or(0.0);
        plan.complete_optimization(score, outcome.duration_ms)?;
        inner.plans.update_with_version(plan).await?;
        info!(
            "计划 {} 重排完成: 策略 {}, 耗时 {}ms, 改动 {} 个事件",
            plan.id,
            outcome.strategy.as_str(),
            outcome.duration_ms,
            outcome.updated_event_ids.len()
        );
        Ok(())
    }

    /// 失败条目带指数退避回到队列；超过重试上限的转入死信
    ///
    /// 在认领事务内执行，由调用方提交：条目在记账落库前不会回到
    /// PENDING，也就不可能被并发实例中途抢走
    async fn record_failure(
        inner: &WorkerInner,
        conn: &mut sqlx::PgConnection,
        batch: &RescheduleBatch,
        cause: &RescheduleError,
    ) -> RescheduleResult<()> {
        let now = Utc::now();
        let message = cause.to_string();

        let mut dead: Vec<i64> = Vec::new();
        for item in &batch.items {
            let next_retry = item.retry_count + 1;
            // 不可重试的错误直接进死信，不再空转
            if !cause.is_retryable() || next_retry >= inner.config.max_item_retries {
                dead.push(item.id);
            } else {
                let backoff = DEBOUNCE_WINDOW_MS << next_retry;
                inner
                    .queue
                    .requeue_for_retry(
                        conn,
                        &[item.id],
                        now + Duration::milliseconds(backoff),
                    )
                    .await?;
            }
        }

        inner
            .queue
            .increment_retry_count(conn, &batch.item_ids())
            .await?;
        inner
            .queue
            .update_batch_status(conn, &dead, QueueItemStatus::Failed, Some(&message))
            .await?;

        if !dead.is_empty() {
            warn!(
                "计划 {} 的 {} 个信号超过重试上限, 转入死信: {}",
                batch.plan_id,
                dead.len(),
                message
            );
        }
        Ok(())
    }
}
