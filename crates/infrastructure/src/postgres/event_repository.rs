use async_trait::async_trait;
use replan_core::{RescheduleError, RescheduleResult};
use replan_domain::{ScheduleEvent, ScheduleEventRepository};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, instrument};

const EVENT_COLUMNS: &str = "id, schedule_plan_id, schedule_task_id, title, date_ms, start_min, \
     end_min, part_index, total_parts, status, is_pinned, utility_score, created_at, updated_at";

pub struct PostgresEventRepository {
    #[allow(dead_code)]
    pool: PgPool,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> RescheduleResult<ScheduleEvent> {
        Ok(ScheduleEvent {
            id: row.try_get("id")?,
            schedule_plan_id: row.try_get("schedule_plan_id")?,
            schedule_task_id: row.try_get("schedule_task_id")?,
            title: row.try_get("title")?,
            date_ms: row.try_get("date_ms")?,
            start_min: row.try_get("start_min")?,
            end_min: row.try_get("end_min")?,
            part_index: row.try_get("part_index")?,
            total_parts: row.try_get("total_parts")?,
            status: row.try_get("status")?,
            is_pinned: row.try_get("is_pinned")?,
            utility_score: row.try_get("utility_score")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleEventRepository for PostgresEventRepository {
    #[instrument(skip(self, conn))]
    async fn list_by_plan_and_range(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
        from_date_ms: i64,
        to_date_ms: i64,
    ) -> RescheduleResult<Vec<ScheduleEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM schedule_events \
             WHERE schedule_plan_id = $1 AND date_ms >= $2 AND date_ms <= $3 \
             ORDER BY date_ms ASC, start_min ASC"
        ))
        .bind(plan_id)
        .bind(from_date_ms)
        .bind(to_date_ms)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_by_id(
        &self,
        conn: &mut PgConnection,
        id: i64,
    ) -> RescheduleResult<ScheduleEvent> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM schedule_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Self::row_to_event(&row),
            None => Err(RescheduleError::validation_error(format!(
                "日程事件 {id} 不存在"
            ))),
        }
    }

    #[instrument(skip(self, conn, events), fields(count = events.len()))]
    async fn create_batch(
        &self,
        conn: &mut PgConnection,
        events: &[ScheduleEvent],
    ) -> RescheduleResult<Vec<ScheduleEvent>> {
        let mut created = Vec::with_capacity(events.len());
        for event in events {
            let row = sqlx::query(&format!(
                "INSERT INTO schedule_events \
                 (schedule_plan_id, schedule_task_id, title, date_ms, start_min, end_min, \
                  part_index, total_parts, status, is_pinned, utility_score) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(event.schedule_plan_id)
            .bind(event.schedule_task_id)
            .bind(&event.title)
            .bind(event.date_ms)
            .bind(event.start_min)
            .bind(event.end_min)
            .bind(event.part_index)
            .bind(event.total_parts)
            .bind(event.status)
            .bind(event.is_pinned)
            .bind(event.utility_score)
            .fetch_one(&mut *conn)
            .await?;
            created.push(Self::row_to_event(&row)?);
        }
        Ok(created)
    }

    #[instrument(skip(self, conn, events), fields(count = events.len()))]
    async fn update_batch(
        &self,
        conn: &mut PgConnection,
        events: &[ScheduleEvent],
    ) -> RescheduleResult<()> {
        for event in events {
            sqlx::query(
                "UPDATE schedule_events SET \
                 date_ms = $2, start_min = $3, end_min = $4, part_index = $5, \
                 total_parts = $6, status = $7, utility_score = $8, updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind(event.id)
            .bind(event.date_ms)
            .bind(event.start_min)
            .bind(event.end_min)
            .bind(event.part_index)
            .bind(event.total_parts)
            .bind(event.status)
            .bind(event.utility_score)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn delete_by_ids(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> RescheduleResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM schedule_events WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, conn))]
    async fn delete_planned_from_date(
        &self,
        conn: &mut PgConnection,
        plan_id: i64,
        from_date_ms: i64,
    ) -> RescheduleResult<u64> {
        let result = sqlx::query(
            "DELETE FROM schedule_events \
             WHERE schedule_plan_id = $1 AND date_ms >= $2 \
               AND status = 'PLANNED' AND is_pinned = FALSE",
        )
        .bind(plan_id)
        .bind(from_date_ms)
        .execute(&mut *conn)
        .await?;

        debug!("清除计划 {} 自 {} 起的未钉住PLANNED事件: {} 条", plan_id, from_date_ms, result.rows_affected());
        Ok(result.rows_affected())
    }
}
