//! Per-instance run locks.
//!
//! A run reads the previous snapshot and commits the next one, so two runs of
//! the same instance must never overlap. `LocalInstanceLock` covers a single
//! process; `PgInstanceLock` adds a Postgres advisory lock so the CLI, the
//! scheduler and the operator API serialize against each other too.

use crate::error::RosterSyncResult;
use crate::types::InstanceId;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Namespace of the two-key advisory lock, "RSYN".
const RUN_LOCK_NAMESPACE: i32 = 0x5253_594E;

#[async_trait]
pub trait InstanceLock: Send + Sync {
    /// Waits until no other run of `instance_id` holds the lock.
    async fn acquire(&self, instance_id: InstanceId) -> RosterSyncResult<HeldLock>;

    /// Drops bookkeeping for a deleted instance.
    fn forget(&self, instance_id: InstanceId);
}

/// Held for the whole read, reconcile and commit of one run.
pub struct HeldLock {
    local: OwnedMutexGuard<()>,
    advisory: Option<Transaction<'static, Postgres>>
}

impl HeldLock {
    /// Ends the advisory transaction, then frees the in-process slot.
    pub async fn release(self) {
        let Self { local, advisory } = self;
        if let Some(tx) = advisory {
            if let Err(e) = tx.commit().await {
                warn!(error = %e, "Failed to release advisory run lock");
            }
        }
        drop(local);
    }
}

#[derive(Default)]
pub struct LocalInstanceLock {
    slots: DashMap<InstanceId, Arc<Mutex<()>>>
}

impl LocalInstanceLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock(&self, instance_id: InstanceId) -> OwnedMutexGuard<()> {
        let slot = self
            .slots
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        slot.lock_owned().await
    }
}

#[async_trait]
impl InstanceLock for LocalInstanceLock {
    async fn acquire(&self, instance_id: InstanceId) -> RosterSyncResult<HeldLock> {
        Ok(HeldLock {
            local: self.lock(instance_id).await,
            advisory: None
        })
    }

    fn forget(&self, instance_id: InstanceId) {
        self.slots.remove(&instance_id);
    }
}

/// Transaction-scoped `pg_advisory_xact_lock`, released on commit or when the
/// connection drops.
pub struct PgInstanceLock {
    pool: PgPool,
    local: LocalInstanceLock
}

impl PgInstanceLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            local: LocalInstanceLock::new()
        }
    }
}

#[async_trait]
impl InstanceLock for PgInstanceLock {
    async fn acquire(&self, instance_id: InstanceId) -> RosterSyncResult<HeldLock> {
        let local = self.local.lock(instance_id).await;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(RUN_LOCK_NAMESPACE)
            .bind(advisory_key(instance_id))
            .execute(&mut *tx)
            .await?;
        debug!(instance_id, "Acquired advisory run lock");

        Ok(HeldLock {
            local,
            advisory: Some(tx)
        })
    }

    fn forget(&self, instance_id: InstanceId) {
        self.local.forget(instance_id);
    }
}

/// Folds the instance id into the 32-bit second key of the advisory lock.
fn advisory_key(instance_id: InstanceId) -> i32 {
    (instance_id ^ (instance_id >> 32)) as i32
}
