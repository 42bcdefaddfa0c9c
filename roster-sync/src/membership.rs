//! Host-side enrolment, group and cohort state.
//!
//! The engine only ever activates or suspends memberships; rows are never
//! deleted so the enrolment history survives every run.

use crate::error::RosterSyncResult;
use crate::types::{
    AccountId, CohortId, CourseId, GroupId, InstanceId, MembershipRecord, MembershipStatus,
    ReconciliationInstance, RoleId, ValidityWindow, WelcomeMessagePolicy
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Component tag written on group memberships created by the sync, so they
/// can be told apart from manual ones.
pub const GROUP_COMPONENT: &str = "roster_sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Created,
    Reactivated
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn membership(
        &self,
        instance_id: InstanceId,
        account_id: AccountId
    ) -> RosterSyncResult<Option<MembershipRecord>>;

    /// Creates the membership or reactivates a suspended one.
    async fn activate(
        &self,
        instance: &ReconciliationInstance,
        account_id: AccountId,
        role: RoleId,
        window: ValidityWindow
    ) -> RosterSyncResult<Activation>;

    /// Returns whether an active membership was suspended.
    async fn suspend(&self, instance_id: InstanceId, account_id: AccountId) -> RosterSyncResult<bool>;

    async fn count_active(&self, instance_id: InstanceId) -> RosterSyncResult<u64>;

    async fn is_cohort_member(
        &self,
        cohort_id: CohortId,
        account_id: AccountId
    ) -> RosterSyncResult<bool>;

    async fn is_group_member(&self, group_id: GroupId, account_id: AccountId) -> RosterSyncResult<bool>;

    async fn add_group_member(
        &self,
        group_id: GroupId,
        account_id: AccountId,
        instance_id: InstanceId
    ) -> RosterSyncResult<()>;

    async fn create_group(&self, course_id: CourseId, name: &str) -> RosterSyncResult<GroupId>;

    /// Moves every group membership this instance created into `group_id`.
    async fn move_group_members(
        &self,
        instance_id: InstanceId,
        group_id: GroupId
    ) -> RosterSyncResult<u64>;
}

/// Hook for the host's course welcome message. Composition and delivery
/// belong to the host.
#[async_trait]
pub trait WelcomeNotifier: Send + Sync {
    async fn send_welcome(
        &self,
        instance: &ReconciliationInstance,
        account_id: AccountId,
        policy: WelcomeMessagePolicy
    ) -> RosterSyncResult<()>;
}

pub struct PgMembershipStore {
    pool: PgPool
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn membership(
        &self,
        instance_id: InstanceId,
        account_id: AccountId
    ) -> RosterSyncResult<Option<MembershipRecord>> {
        let row = sqlx::query(
            r#"
            SELECT status, role_id, time_start, time_end
            FROM enrolments
            WHERE instance_id = $1 AND account_id = $2
            "#
        )
        .bind(instance_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(MembershipRecord {
            instance_id,
            account_id,
            status: MembershipStatus::from_i16(row.try_get("status")?),
            role: row.try_get("role_id")?,
            window: ValidityWindow {
                start: row.try_get::<DateTime<Utc>, _>("time_start")?,
                end: row.try_get::<Option<DateTime<Utc>>, _>("time_end")?
            }
        }))
    }

    async fn activate(
        &self,
        instance: &ReconciliationInstance,
        account_id: AccountId,
        role: RoleId,
        window: ValidityWindow
    ) -> RosterSyncResult<Activation> {
        let (inserted,) = sqlx::query_as::<_, (bool,)>(
            r#"
            INSERT INTO enrolments (instance_id, account_id, status, role_id, time_start, time_end, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (instance_id, account_id) DO UPDATE SET
                status = 0,
                role_id = EXCLUDED.role_id,
                time_start = EXCLUDED.time_start,
                time_end = EXCLUDED.time_end,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#
        )
        .bind(instance.id)
        .bind(account_id)
        .bind(role)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted {
            Activation::Created
        } else {
            Activation::Reactivated
        })
    }

    async fn suspend(&self, instance_id: InstanceId, account_id: AccountId) -> RosterSyncResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE enrolments SET status = 1, updated_at = NOW()
            WHERE instance_id = $1 AND account_id = $2 AND status = 0
            "#
        )
        .bind(instance_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_active(&self, instance_id: InstanceId) -> RosterSyncResult<u64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*) FROM enrolments WHERE instance_id = $1 AND status = 0
            "#
        )
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn is_cohort_member(
        &self,
        cohort_id: CohortId,
        account_id: AccountId
    ) -> RosterSyncResult<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            r#"
            SELECT EXISTS(SELECT 1 FROM cohort_members WHERE cohort_id = $1 AND account_id = $2)
            "#
        )
        .bind(cohort_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn is_group_member(&self, group_id: GroupId, account_id: AccountId) -> RosterSyncResult<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            r#"
            SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = $1 AND account_id = $2)
            "#
        )
        .bind(group_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn add_group_member(
        &self,
        group_id: GroupId,
        account_id: AccountId,
        instance_id: InstanceId
    ) -> RosterSyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, account_id, component, item_id, added_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_id, account_id) DO NOTHING
            "#
        )
        .bind(group_id)
        .bind(account_id)
        .bind(GROUP_COMPONENT)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_group(&self, course_id: CourseId, name: &str) -> RosterSyncResult<GroupId> {
        let (id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO course_groups (course_id, name, created_at) VALUES ($1, $2, NOW())
            RETURNING id
            "#
        )
        .bind(course_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn move_group_members(
        &self,
        instance_id: InstanceId,
        group_id: GroupId
    ) -> RosterSyncResult<u64> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            INSERT INTO group_members (group_id, account_id, component, item_id, added_at)
            SELECT $2, account_id, component, item_id, NOW()
            FROM group_members
            WHERE component = $3 AND item_id = $1 AND group_id <> $2
            ON CONFLICT (group_id, account_id) DO NOTHING
            "#
        )
        .bind(instance_id)
        .bind(group_id)
        .bind(GROUP_COMPONENT)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM group_members
            WHERE component = $3 AND item_id = $1 AND group_id <> $2
            "#
        )
        .bind(instance_id)
        .bind(group_id)
        .bind(GROUP_COMPONENT)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(moved)
    }
}
