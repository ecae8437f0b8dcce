use std::sync::Arc;

use chrono::{Duration, Utc};
use replan_core::RetentionConfig;
use replan_domain::RescheduleQueueRepository;
use tokio::sync::broadcast;
use tracing::{error, info};

/// 定期清理已完成队列条目的后台任务
pub struct RetentionSweeper {
    queue: Arc<dyn RescheduleQueueRepository>,
    config: RetentionConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl RetentionSweeper {
    pub fn new(queue: Arc<dyn RescheduleQueueRepository>, config: RetentionConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            config,
            shutdown_tx,
        }
    }

    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval());
            info!(
                "队列保留清理启动: 间隔 {:?}, 保留 {} 小时",
                config.sweep_interval(),
                config.completed_retention_hours
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let cutoff = Utc::now() - Duration::hours(config.completed_retention_hours);
                        match queue.delete_completed(cutoff).await {
                            Ok(0) => {}
                            Ok(n) => info!("清理 {} 条已完成的队列条目", n),
                            Err(e) => error!("队列清理失败: {}", e),
                        }
                    }
                }
            }
            info!("队列保留清理已停止");
        })
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
