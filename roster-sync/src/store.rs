use crate::error::{RosterSyncError, RosterSyncResult};
use crate::state::{SnapshotData, SyncState};
use crate::types::{
    ExternalCourseMapping, GroupId, InstanceId, NewInstance, ReconciliationInstance,
    WelcomeMessagePolicy
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

/// One snapshot per instance. `upsert` must be a single atomic write.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get(&self, instance_id: InstanceId) -> RosterSyncResult<Option<SyncState>>;

    /// Updates data and `last_modified` of an existing row; inserts the full
    /// snapshot, course metadata and `created` included, otherwise.
    async fn upsert(&self, state: &SyncState) -> RosterSyncResult<()>;

    async fn delete(&self, instance_id: InstanceId) -> RosterSyncResult<bool>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, instance_id: InstanceId) -> RosterSyncResult<Option<ReconciliationInstance>>;

    async fn list_enabled(&self) -> RosterSyncResult<Vec<ReconciliationInstance>>;

    async fn insert(
        &self,
        instance: &NewInstance,
        group_id: Option<GroupId>
    ) -> RosterSyncResult<ReconciliationInstance>;

    async fn update(&self, instance: &ReconciliationInstance) -> RosterSyncResult<()>;

    async fn delete(&self, instance_id: InstanceId) -> RosterSyncResult<bool>;
}

pub struct PgSyncStateStore {
    pool: PgPool
}

impl PgSyncStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStateStore for PgSyncStateStore {
    async fn get(&self, instance_id: InstanceId) -> RosterSyncResult<Option<SyncState>> {
        let row = sqlx::query(
            r#"
            SELECT instance_id, term, college_name, external_course_id, course_name,
                   student_capacity, data, created_at, last_modified
            FROM roster_sync_state
            WHERE instance_id = $1
            "#
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| sync_state_from_row(&row)).transpose()
    }

    async fn upsert(&self, state: &SyncState) -> RosterSyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roster_sync_state
                (instance_id, term, college_name, external_course_id, course_name,
                 student_capacity, data, created_at, last_modified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (instance_id) DO UPDATE SET
                data = EXCLUDED.data,
                last_modified = EXCLUDED.last_modified
            "#
        )
        .bind(state.instance_id)
        .bind(&state.mapping.term)
        .bind(&state.mapping.college_name)
        .bind(&state.mapping.external_course_id)
        .bind(&state.mapping.course_name)
        .bind(i32::try_from(state.mapping.student_capacity).unwrap_or(i32::MAX))
        .bind(Json(state.data()))
        .bind(state.created)
        .bind(state.last_modified)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, instance_id: InstanceId) -> RosterSyncResult<bool> {
        let result = sqlx::query("DELETE FROM roster_sync_state WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn sync_state_from_row(row: &PgRow) -> RosterSyncResult<SyncState> {
    let Json(data): Json<SnapshotData> = row.try_get("data")?;
    let capacity: i32 = row.try_get("student_capacity")?;

    let mapping = ExternalCourseMapping {
        term: row.try_get("term")?,
        external_course_id: row.try_get("external_course_id")?,
        college_name: row.try_get("college_name")?,
        course_name: row.try_get("course_name")?,
        student_capacity: u32::try_from(capacity).unwrap_or(0)
    };

    Ok(SyncState {
        instance_id: row.try_get("instance_id")?,
        mapping,
        success: data.success,
        errors: data.error,
        created: row.try_get("created_at")?,
        last_modified: row.try_get("last_modified")?
    })
}

pub struct PgInstanceStore {
    pool: PgPool
}

impl PgInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn instance_from_row(row: &PgRow) -> RosterSyncResult<ReconciliationInstance> {
    let max_enrolled: Option<i32> = row.try_get("max_enrolled")?;
    let welcome: String = row.try_get("welcome_message")?;

    Ok(ReconciliationInstance {
        id: row.try_get("id")?,
        course_id: row.try_get("course_id")?,
        name: row.try_get("name")?,
        enabled: row.try_get("enabled")?,
        default_role: row.try_get("default_role")?,
        group_id: row.try_get("group_id")?,
        enrol_period_seconds: row.try_get("enrol_period_seconds")?,
        max_enrolled: max_enrolled.and_then(|n| u32::try_from(n).ok()),
        cohort_id: row.try_get("cohort_id")?,
        new_enrolments_allowed: row.try_get("new_enrolments_allowed")?,
        welcome_message: WelcomeMessagePolicy::parse(&welcome)
    })
}

fn capacity_column(max_enrolled: Option<u32>) -> Option<i32> {
    max_enrolled.map(|n| i32::try_from(n).unwrap_or(i32::MAX))
}

#[async_trait]
impl InstanceStore for PgInstanceStore {
    async fn get(&self, instance_id: InstanceId) -> RosterSyncResult<Option<ReconciliationInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, course_id, name, enabled, default_role, group_id, enrol_period_seconds,
                   max_enrolled, cohort_id, new_enrolments_allowed, welcome_message
            FROM roster_instances
            WHERE id = $1
            "#
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| instance_from_row(&row)).transpose()
    }

    async fn list_enabled(&self) -> RosterSyncResult<Vec<ReconciliationInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, course_id, name, enabled, default_role, group_id, enrol_period_seconds,
                   max_enrolled, cohort_id, new_enrolments_allowed, welcome_message
            FROM roster_instances
            WHERE enabled = TRUE
            ORDER BY id
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instance_from_row).collect()
    }

    async fn insert(
        &self,
        instance: &NewInstance,
        group_id: Option<GroupId>
    ) -> RosterSyncResult<ReconciliationInstance> {
        let (id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO roster_instances
                (course_id, name, enabled, default_role, group_id, enrol_period_seconds,
                 max_enrolled, cohort_id, new_enrolments_allowed, welcome_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            RETURNING id
            "#
        )
        .bind(instance.course_id)
        .bind(&instance.name)
        .bind(instance.enabled)
        .bind(instance.default_role)
        .bind(group_id)
        .bind(instance.enrol_period_seconds)
        .bind(capacity_column(instance.max_enrolled))
        .bind(instance.cohort_id)
        .bind(instance.new_enrolments_allowed)
        .bind(instance.welcome_message.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(instance.clone().into_instance(id, group_id))
    }

    async fn update(&self, instance: &ReconciliationInstance) -> RosterSyncResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE roster_instances SET
                name = $2, enabled = $3, default_role = $4, group_id = $5,
                enrol_period_seconds = $6, max_enrolled = $7, cohort_id = $8,
                new_enrolments_allowed = $9, welcome_message = $10, updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(instance.id)
        .bind(&instance.name)
        .bind(instance.enabled)
        .bind(instance.default_role)
        .bind(instance.group_id)
        .bind(instance.enrol_period_seconds)
        .bind(capacity_column(instance.max_enrolled))
        .bind(instance.cohort_id)
        .bind(instance.new_enrolments_allowed)
        .bind(instance.welcome_message.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RosterSyncError::InstanceNotFound(instance.id));
        }
        Ok(())
    }

    async fn delete(&self, instance_id: InstanceId) -> RosterSyncResult<bool> {
        let result = sqlx::query("DELETE FROM roster_instances WHERE id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
