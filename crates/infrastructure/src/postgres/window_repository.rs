use async_trait::async_trait;
use replan_core::RescheduleResult;
use replan_domain::{ScheduleWindow, ScheduleWindowRepository};
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

pub struct PostgresWindowRepository {
    #[allow(dead_code)]
    pool: PgPool,
}

impl PostgresWindowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_window(row: &sqlx::postgres::PgRow) -> RescheduleResult<ScheduleWindow> {
        Ok(ScheduleWindow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            date_ms: row.try_get("date_ms")?,
            start_min: row.try_get("start_min")?,
            end_min: row.try_get("end_min")?,
            is_deep_work: row.try_get("is_deep_work")?,
        })
    }
}

#[async_trait]
impl ScheduleWindowRepository for PostgresWindowRepository {
    #[instrument(skip(self, conn))]
    async fn list_by_user_and_range(
        &self,
        conn: &mut PgConnection,
        user_id: i64,
        from_date_ms: i64,
        to_date_ms: i64,
    ) -> RescheduleResult<Vec<ScheduleWindow>> {
        let rows = sqlx::query(
            "SELECT id, user_id, date_ms, start_min, end_min, is_deep_work FROM schedule_windows \
             WHERE user_id = $1 AND date_ms >= $2 AND date_ms <= $3 \
             ORDER BY date_ms ASC, start_min ASC",
        )
        .bind(user_id)
        .bind(from_date_ms)
        .bind(to_date_ms)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::row_to_window).collect()
    }
}
