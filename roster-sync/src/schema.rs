//! Table layout used by the Postgres stores.
//!
//! The sync owns `roster_instances` and `roster_sync_state`. The remaining
//! tables belong to the host; they are created only when absent so that a
//! standalone deployment (and the integration tests) can run.

use crate::error::RosterSyncResult;
use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        deleted BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE TABLE IF NOT EXISTS course_groups (
        id BIGSERIAL PRIMARY KEY,
        course_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS group_members (
        group_id BIGINT NOT NULL,
        account_id BIGINT NOT NULL,
        component TEXT NOT NULL DEFAULT '',
        item_id BIGINT NOT NULL DEFAULT 0,
        added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (group_id, account_id)
    )",
    "CREATE TABLE IF NOT EXISTS cohort_members (
        cohort_id BIGINT NOT NULL,
        account_id BIGINT NOT NULL,
        PRIMARY KEY (cohort_id, account_id)
    )",
    "CREATE TABLE IF NOT EXISTS roster_instances (
        id BIGSERIAL PRIMARY KEY,
        course_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        default_role BIGINT NOT NULL,
        group_id BIGINT,
        enrol_period_seconds BIGINT,
        max_enrolled INTEGER,
        cohort_id BIGINT,
        new_enrolments_allowed BOOLEAN NOT NULL DEFAULT TRUE,
        welcome_message TEXT NOT NULL DEFAULT 'disabled',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS enrolments (
        instance_id BIGINT NOT NULL,
        account_id BIGINT NOT NULL,
        status SMALLINT NOT NULL,
        role_id BIGINT NOT NULL,
        time_start TIMESTAMPTZ NOT NULL,
        time_end TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (instance_id, account_id)
    )",
    "CREATE TABLE IF NOT EXISTS roster_sync_state (
        instance_id BIGINT PRIMARY KEY REFERENCES roster_instances(id) ON DELETE CASCADE,
        term TEXT NOT NULL DEFAULT '',
        college_name TEXT NOT NULL DEFAULT '',
        external_course_id TEXT NOT NULL DEFAULT '',
        course_name TEXT NOT NULL DEFAULT '',
        student_capacity INTEGER NOT NULL DEFAULT 0,
        data JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        last_modified TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_enrolments_instance_status
        ON enrolments(instance_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_group_members_item
        ON group_members(component, item_id)"
];

pub async fn initialize_schema(pool: &PgPool) -> RosterSyncResult<()> {
    for &statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
