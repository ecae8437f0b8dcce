use async_trait::async_trait;
use replan_core::{RescheduleError, RescheduleResult};
use replan_domain::{PlanStatus, SchedulePlan, SchedulePlanRepository};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

const PLAN_COLUMNS: &str = "id, user_id, tenant_id, name, plan_type, start_date_ms, end_date_ms, \
     algorithm, optimization_score, optimized_at, optimization_duration_ms, version, \
     parent_plan_id, status, is_stale, created_at, updated_at";

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_plan(row: &sqlx::postgres::PgRow) -> RescheduleResult<SchedulePlan> {
        Ok(SchedulePlan {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            plan_type: row.try_get("plan_type")?,
            start_date_ms: row.try_get("start_date_ms")?,
            end_date_ms: row.try_get("end_date_ms")?,
            algorithm: row.try_get("algorithm")?,
            optimization_score: row.try_get("optimization_score")?,
            optimized_at: row.try_get("optimized_at")?,
            optimization_duration_ms: row.try_get("optimization_duration_ms")?,
            version: row.try_get("version")?,
            parent_plan_id: row.try_get("parent_plan_id")?,
            status: row.try_get("status")?,
            is_stale: row.try_get("is_stale")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl SchedulePlanRepository for PostgresPlanRepository {
    #[instrument(skip(self, plan), fields(user_id = %plan.user_id, plan_type = %plan.plan_type))]
    async fn create(&self, plan: &SchedulePlan) -> RescheduleResult<SchedulePlan> {
        let row = sqlx::query(&format!(
            "INSERT INTO schedule_plans \
             (user_id, tenant_id, name, plan_type, start_date_ms, end_date_ms, version, \
              parent_plan_id, status, is_stale) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(plan.user_id)
        .bind(plan.tenant_id)
        .bind(&plan.name)
        .bind(&plan.plan_type)
        .bind(plan.start_date_ms)
        .bind(plan.end_date_ms)
        .bind(plan.version)
        .bind(plan.parent_plan_id)
        .bind(plan.status)
        .bind(plan.is_stale)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_plan(&row)?;
        debug!("创建日程计划成功: {}", created.entity_description());
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> RescheduleResult<SchedulePlan> {
        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM schedule_plans WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_plan(&row),
            None => Err(RescheduleError::plan_not_found(id)),
        }
    }

    #[instrument(skip(self))]
    async fn get_active_by_user(&self, user_id: i64) -> RescheduleResult<Option<SchedulePlan>> {
        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM schedule_plans \
             WHERE user_id = $1 AND status = 'ACTIVE' \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_plan).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_user(&self, user_id: i64) -> RescheduleResult<Vec<SchedulePlan>> {
        let rows = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM schedule_plans \
             WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_plan).collect()
    }

    /// 版本号作为更新条件，命中0行即并发冲突
    #[instrument(skip(self, plan), fields(plan_id = %plan.id, version = %plan.version))]
    async fn update_with_version(&self, plan: &SchedulePlan) -> RescheduleResult<SchedulePlan> {
        let row = sqlx::query(&format!(
            "UPDATE schedule_plans SET \
             name = $3, status = $4, algorithm = $5, optimization_score = $6, \
             optimized_at = $7, optimization_duration_ms = $8, is_stale = $9, \
             version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(plan.id)
        .bind(plan.version)
        .bind(&plan.name)
        .bind(plan.status)
        .bind(&plan.algorithm)
        .bind(plan.optimization_score)
        .bind(plan.optimized_at)
        .bind(plan.optimization_duration_ms)
        .bind(plan.is_stale)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_plan(&row),
            None => {
                warn!("计划 {} 版本冲突, 期望版本 {}", plan.id, plan.version);
                Err(RescheduleError::version_conflict(plan.id, plan.version))
            }
        }
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: i64, status: PlanStatus) -> RescheduleResult<()> {
        let result = sqlx::query(
            "UPDATE schedule_plans SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RescheduleError::plan_not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_stale(&self, id: i64) -> RescheduleResult<()> {
        let result = sqlx::query(
            "UPDATE schedule_plans SET is_stale = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RescheduleError::plan_not_found(id));
        }
        Ok(())
    }
}
