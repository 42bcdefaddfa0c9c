use crate::error::RosterSyncResult;
use crate::types::AccountId;
use async_trait::async_trait;
use sqlx::PgPool;

/// Maps external roster identifiers to local accounts.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` when no live account carries the identifier.
    async fn resolve(&self, identifier: &str) -> RosterSyncResult<Option<AccountId>>;
}

/// Resolves identifiers against the host `accounts` table by username.
pub struct PgIdentityResolver {
    pool: PgPool
}

impl PgIdentityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for PgIdentityResolver {
    async fn resolve(&self, identifier: &str) -> RosterSyncResult<Option<AccountId>> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT id FROM accounts WHERE username = $1 AND deleted = FALSE
            "#
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }
}
