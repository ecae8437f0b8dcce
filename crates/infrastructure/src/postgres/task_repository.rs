use async_trait::async_trait;
use replan_core::RescheduleResult;
use replan_domain::{ScheduleTask, ScheduleTaskRepository, ScheduleTaskStatus};
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

const TASK_COLUMNS: &str = "id, schedule_plan_id, task_id, title, duration_min, priority, \
     priority_score, is_deep_work, earliest_start_ms, deadline_ms, allow_split, min_split_min, \
     max_split_count, is_pinned, status, status_reason, dependent_task_ids, created_at, updated_at";

pub struct PostgresTaskRepository {
    #[allow(dead_code)]
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> RescheduleResult<ScheduleTask> {
        let dependent_task_ids: Vec<i64> = row
            .try_get::<Vec<i64>, _>("dependent_task_ids")
            .unwrap_or_default();

        Ok(ScheduleTask {
            id: row.try_get("id")?,
            schedule_plan_id: row.try_get("schedule_plan_id")?,
            task_id: row.try_get("task_id")?,
            title: row.try_get("title")?,
            duration_min: row.try_get("duration_min")?,
            priority: row.try_get("priority")?,
            priority_score: row.try_get("priority_score")?,
            is_deep_work: row.try_get("is_deep_work")?,
            earliest_start_ms: row.try_get("earliest_start_ms")?,
            deadline_ms: row.try_get("deadline_ms")?,
            allow_split: row.try_get("allow_split")?,
            min_split_min: row.try_get("min_split_min")?,
            max_split_count: row.try_get("max_split_count")?,
            is_pinned: row.try_get("is_pinned")?,
            status: row.try_get("status")?,
            status_reason: row.try_get("status_reason")?,
            dependent_task_ids,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleTaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, conn))]
    async fn list_by_plan(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
    ) -> RescheduleResult<Vec<ScheduleTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM schedule_tasks \
             WHERE schedule_plan_id = $1 \
             ORDER BY priority ASC, id ASC"
        ))
        .bind(plan_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_by_ids(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<Vec<ScheduleTask>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM schedule_tasks WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, conn))]
    async fn update_schedule_status(
        &self,
        conn: &mut PgConnection,
        id: i64,
        status: ScheduleTaskStatus,
        reason: Option<&str>,
    ) -> RescheduleResult<()> {
        sqlx::query(
            "UPDATE schedule_tasks SET status = $2, status_reason = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(reason)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
