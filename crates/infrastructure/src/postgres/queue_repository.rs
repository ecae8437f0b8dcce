use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replan_core::{RescheduleError, RescheduleResult};
use replan_domain::{
    QueueItemStatus, RescheduleQueueItem, RescheduleQueueRepository, MAX_DEBOUNCE_WAIT_MS,
};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, instrument};

const QUEUE_COLUMNS: &str = "id, user_id, schedule_plan_id, trigger_type, entity_type, entity_id, \
     change_payload, status, priority, debounce_until, first_created_at, retry_count, \
     error_message, processed_at, created_at, updated_at";

pub struct PostgresQueueRepository {
    pool: PgPool,
}

/// 去抖上限换算成秒，作为 make_interval 的绑定参数，与常量保持同源
fn max_debounce_secs() -> f64 {
    MAX_DEBOUNCE_WAIT_MS as f64 / 1000.0
}

impl PostgresQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &sqlx::postgres::PgRow) -> RescheduleResult<RescheduleQueueItem> {
        Ok(RescheduleQueueItem {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            schedule_plan_id: row.try_get("schedule_plan_id")?,
            trigger_type: row.try_get("trigger_type")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            change_payload: row.try_get("change_payload")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            debounce_until: row.try_get("debounce_until")?,
            first_created_at: row.try_get("first_created_at")?,
            retry_count: row.try_get("retry_count")?,
            error_message: row.try_get("error_message")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl RescheduleQueueRepository for PostgresQueueRepository {
    /// 命中 (计划, 触发类型, 实体) 的 PENDING 行时合并而不新建：
    /// 载荷取新值，去抖截止时间重新武装但不超过首次入队时间加上限
    #[instrument(skip(self, item), fields(
        plan_id = %item.schedule_plan_id,
        trigger = %item.trigger_type.as_str(),
        entity_id = %item.entity_id,
    ))]
    async fn upsert(&self, item: &RescheduleQueueItem) -> RescheduleResult<RescheduleQueueItem> {
        let row = sqlx::query(&format!(
            "INSERT INTO reschedule_queue \
             (user_id, schedule_plan_id, trigger_type, entity_type, entity_id, change_payload, \
              status, priority, debounce_until, first_created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (schedule_plan_id, trigger_type, entity_id) WHERE status = 'PENDING' \
             DO UPDATE SET \
                change_payload = EXCLUDED.change_payload, \
                priority = LEAST(reschedule_queue.priority, EXCLUDED.priority), \
                debounce_until = LEAST(EXCLUDED.debounce_until, \
                    reschedule_queue.first_created_at + make_interval(secs => $11)), \
                updated_at = NOW() \
             RETURNING {QUEUE_COLUMNS}"
        ))
        .bind(item.user_id)
        .bind(item.schedule_plan_id)
        .bind(item.trigger_type)
        .bind(&item.entity_type)
        .bind(item.entity_id)
        .bind(&item.change_payload)
        .bind(item.status)
        .bind(item.priority)
        .bind(item.debounce_until)
        .bind(item.first_created_at)
        .bind(max_debounce_secs())
        .fetch_one(&self.pool)
        .await?;

        let saved = Self::row_to_item(&row)?;
        debug!("变更信号入队: id={}, 去抖至 {}", saved.id, saved.debounce_until);
        Ok(saved)
    }

    /// 到期条件：去抖截止已过，或首次入队已超过去抖上限
    #[instrument(skip(self))]
    async fn dirty_plan_ids(&self, now: DateTime<Utc>, limit: i64) -> RescheduleResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT schedule_plan_id FROM reschedule_queue \
             WHERE status = 'PENDING' \
               AND (debounce_until <= $1 OR first_created_at <= $1 - make_interval(secs => $3)) \
             GROUP BY schedule_plan_id \
             ORDER BY MIN(priority) ASC, MIN(first_created_at) ASC \
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .bind(max_debounce_secs())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("schedule_plan_id").map_err(RescheduleError::from))
            .collect()
    }

    #[instrument(skip(self, conn))]
    async fn fetch_and_lock_batch(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
        now: DateTime<Utc>,
    ) -> RescheduleResult<Vec<RescheduleQueueItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM reschedule_queue \
             WHERE schedule_plan_id = $1 AND status = 'PENDING' \
               AND (debounce_until <= $2 OR first_created_at <= $2 - make_interval(secs => $3)) \
             ORDER BY priority ASC, created_at ASC \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(plan_id)
        .bind(now)
        .bind(max_debounce_secs())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn mark_processing(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE reschedule_queue SET status = 'PROCESSING', updated_at = NOW() \
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn update_batch_status(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
        status: QueueItemStatus,
        error_message: Option<&str>,
    ) -> RescheduleResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let stamp_processed = matches!(
            status,
            QueueItemStatus::Completed | QueueItemStatus::Failed
        );
        sqlx::query(
            "UPDATE reschedule_queue SET \
                status = $2, \
                error_message = $3, \
                processed_at = CASE WHEN $4 THEN NOW() ELSE processed_at END, \
                updated_at = NOW() \
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(status)
        .bind(error_message)
        .bind(stamp_processed)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn increment_retry_count(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE reschedule_queue SET retry_count = retry_count + 1, updated_at = NOW() \
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn requeue_for_retry(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
        debounce_until: DateTime<Utc>,
    ) -> RescheduleResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE reschedule_queue SET \
                status = 'PENDING', \
                debounce_until = $2, \
                updated_at = NOW() \
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(debounce_until)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_completed(&self, older_than: DateTime<Utc>) -> RescheduleResult<u64> {
        let result = sqlx::query(
            "DELETE FROM reschedule_queue \
             WHERE status = 'COMPLETED' AND processed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
