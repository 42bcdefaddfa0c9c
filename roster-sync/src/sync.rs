use crate::client::{RosterSource, create_roster_client};
use crate::config::{FetchFailurePolicy, RosterSyncConfig};
use crate::engine::{ReconciliationEngine, RunStats};
use crate::error::{RosterSyncError, RosterSyncResult};
use crate::lock::{InstanceLock, LocalInstanceLock, PgInstanceLock};
use crate::membership::{MembershipStore, PgMembershipStore, WelcomeNotifier};
use crate::resolver::{IdentityResolver, PgIdentityResolver};
use crate::state::{ExceptionRow, SyncState};
use crate::store::{InstanceStore, PgInstanceStore, PgSyncStateStore, SyncStateStore};
use crate::token::{TokenProvider, create_token_client};
use crate::types::{
    ExternalCourseMapping, GroupTarget, InstanceId, NewInstance, ReconciliationInstance
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Host-side collaborators of the sync.
pub struct SyncBackends {
    pub resolver: Arc<dyn IdentityResolver>,
    pub memberships: Arc<dyn MembershipStore>,
    pub states: Arc<dyn SyncStateStore>,
    pub instances: Arc<dyn InstanceStore>,
    pub notifier: Option<Arc<dyn WelcomeNotifier>>
}

impl SyncBackends {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            resolver: Arc::new(PgIdentityResolver::new(pool.clone())),
            memberships: Arc::new(PgMembershipStore::new(pool.clone())),
            states: Arc::new(PgSyncStateStore::new(pool.clone())),
            instances: Arc::new(PgInstanceStore::new(pool)),
            notifier: None
        }
    }
}

/// Why a run ended before touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    TokenUnavailable,
    FetchUnavailable,
    NoCourseMapping
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("instance disabled"),
            Self::TokenUnavailable => f.write_str("no access token"),
            Self::FetchUnavailable => f.write_str("member list unavailable"),
            Self::NoCourseMapping => f.write_str("no external course mapped")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub instance_id: InstanceId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub synced: usize,
    pub errors: usize,
    pub stats: RunStats
}

impl SyncReport {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            started_at: Utc::now(),
            completed_at: None,
            synced: 0,
            errors: 0,
            stats: RunStats::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Reconciled(SyncReport),
    Skipped { instance_id: InstanceId, reason: SkipReason }
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Reconciled(report) => Some(report),
            Self::Skipped { .. } => None
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Reconciled(_) => "reconciled",
            Self::Skipped { .. } => "skipped"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepError {
    pub instance_id: InstanceId,
    pub error: String,
    pub timestamp: DateTime<Utc>
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reconciled: Vec<SyncReport>,
    pub skipped: Vec<(InstanceId, SkipReason)>,
    pub errors: Vec<SweepError>
}

impl SweepReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn add_error(&mut self, instance_id: InstanceId, error: impl ToString) {
        self.errors.push(SweepError {
            instance_id,
            error: error.to_string(),
            timestamp: Utc::now()
        });
    }

    fn record(&mut self, result: RosterSyncResult<SyncOutcome>, instance_id: InstanceId) {
        match result {
            Ok(SyncOutcome::Reconciled(report)) => self.reconciled.push(report),
            Ok(SyncOutcome::Skipped { reason, .. }) => self.skipped.push((instance_id, reason)),
            Err(e) => self.add_error(instance_id, e)
        }
    }
}

/// One option of the external course picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseOption {
    pub key: String,
    pub label: String
}

pub struct RosterSyncService {
    config: RosterSyncConfig,
    tokens: Arc<dyn TokenProvider>,
    roster: Arc<dyn RosterSource>,
    engine: ReconciliationEngine,
    memberships: Arc<dyn MembershipStore>,
    states: Arc<dyn SyncStateStore>,
    instances: Arc<dyn InstanceStore>,
    locks: Arc<dyn InstanceLock>
}

impl RosterSyncService {
    pub fn new(
        config: RosterSyncConfig,
        tokens: Arc<dyn TokenProvider>,
        roster: Arc<dyn RosterSource>,
        backends: SyncBackends
    ) -> Self {
        let mut engine = ReconciliationEngine::new(backends.resolver, backends.memberships.clone());
        if let Some(notifier) = backends.notifier {
            engine = engine.with_notifier(notifier);
        }

        Self {
            config,
            tokens,
            roster,
            engine,
            memberships: backends.memberships,
            states: backends.states,
            instances: backends.instances,
            locks: Arc::new(LocalInstanceLock::new())
        }
    }

    /// Replaces the in-process run lock, e.g. with one shared across
    /// processes.
    pub fn with_instance_lock(mut self, locks: Arc<dyn InstanceLock>) -> Self {
        self.locks = locks;
        self
    }

    /// Wires the HTTP source clients and the Postgres stores. Runs are
    /// serialized through an advisory lock on the same database.
    pub fn from_pool(config: RosterSyncConfig, pool: PgPool) -> RosterSyncResult<Self> {
        let tokens = create_token_client(config.source.clone(), &config.http)?;
        let roster = create_roster_client(config.source.clone(), &config.http)?;
        let locks = Arc::new(PgInstanceLock::new(pool.clone()));
        Ok(Self::new(config, tokens, roster, SyncBackends::postgres(pool)).with_instance_lock(locks))
    }

    pub fn config(&self) -> &RosterSyncConfig {
        &self.config
    }

    async fn load_instance(&self, instance_id: InstanceId) -> RosterSyncResult<ReconciliationInstance> {
        self.instances
            .get(instance_id)
            .await?
            .ok_or(RosterSyncError::InstanceNotFound(instance_id))
    }

    /// Re-runs the reconciliation of one instance against the course recorded
    /// in its snapshot.
    #[instrument(skip(self))]
    pub async fn sync_instance(&self, instance_id: InstanceId) -> RosterSyncResult<SyncOutcome> {
        let held = self.locks.acquire(instance_id).await?;
        let started = Instant::now();

        let result = self.resync(instance_id).await;
        held.release().await;
        record_run(&result, started);
        result
    }

    async fn resync(&self, instance_id: InstanceId) -> RosterSyncResult<SyncOutcome> {
        let instance = self.load_instance(instance_id).await?;
        if !instance.enabled {
            return Ok(SyncOutcome::Skipped {
                instance_id,
                reason: SkipReason::Disabled
            });
        }
        let previous = self.states.get(instance_id).await?;
        self.run(&instance, previous.as_ref(), None).await
    }

    /// Sweeps every enabled instance, at most `sync.max_concurrent_runs` at a
    /// time.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> RosterSyncResult<SweepReport> {
        let mut report = SweepReport::new();
        let instances = self.instances.list_enabled().await?;
        info!(count = instances.len(), "Starting roster sweep");

        let results: Vec<_> = futures_util::stream::iter(instances)
            .map(|instance| async move { (instance.id, self.sync_instance(instance.id).await) })
            .buffer_unordered(self.config.sync.max_concurrent_runs.max(1))
            .collect()
            .await;

        for (instance_id, result) in results {
            if let Err(e) = &result {
                warn!(instance_id, error = %e, "Instance sync failed");
            }
            report.record(result, instance_id);
        }

        report.complete();
        info!(
            reconciled = report.reconciled.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Roster sweep completed"
        );

        Ok(report)
    }

    /// Stores a new instance bound to `mapping` and runs its first
    /// reconciliation.
    ///
    /// The snapshot carrying the mapping is written before the first run, so
    /// later runs know which external course to fetch even when this one is
    /// skipped or fails.
    #[instrument(skip(self, new_instance), fields(course_id = new_instance.course_id))]
    pub async fn create_instance(
        &self,
        new_instance: NewInstance,
        mapping: ExternalCourseMapping
    ) -> RosterSyncResult<(ReconciliationInstance, SyncOutcome)> {
        let group_id = match new_instance.group {
            GroupTarget::None => None,
            GroupTarget::Existing(group_id) => Some(group_id),
            GroupTarget::CreateNew => {
                let name = if mapping.course_name.is_empty() {
                    new_instance.name.as_str()
                } else {
                    mapping.course_name.as_str()
                };
                let group_id = self
                    .memberships
                    .create_group(new_instance.course_id, name)
                    .await?;
                info!(group_id, name, "Created target group");
                Some(group_id)
            }
        };

        let instance = self.instances.insert(&new_instance, group_id).await?;
        info!(instance_id = instance.id, course = %mapping.external_course_id, "Created roster instance");

        let held = self.locks.acquire(instance.id).await?;
        let started = Instant::now();

        let result = self.first_run(&instance, mapping).await;
        held.release().await;
        record_run(&result, started);
        Ok((instance, result?))
    }

    async fn first_run(
        &self,
        instance: &ReconciliationInstance,
        mapping: ExternalCourseMapping
    ) -> RosterSyncResult<SyncOutcome> {
        let initial = SyncState::new(instance.id, mapping, Utc::now());
        self.states.upsert(&initial).await?;
        self.run(instance, Some(&initial), None).await
    }

    /// Persists changed settings. A new target group takes over the group
    /// memberships this instance created.
    #[instrument(skip(self, instance), fields(instance_id = instance.id))]
    pub async fn update_instance(&self, instance: &ReconciliationInstance) -> RosterSyncResult<()> {
        let held = self.locks.acquire(instance.id).await?;
        let result = self.apply_update(instance).await;
        held.release().await;
        result
    }

    async fn apply_update(&self, instance: &ReconciliationInstance) -> RosterSyncResult<()> {
        let current = self.load_instance(instance.id).await?;
        self.instances.update(instance).await?;

        if let Some(group_id) = instance.group_id.filter(|g| current.group_id != Some(*g)) {
            let moved = self
                .memberships
                .move_group_members(instance.id, group_id)
                .await?;
            info!(instance_id = instance.id, group_id, moved, "Moved group members");
        }

        Ok(())
    }

    /// Deletes the snapshot together with the instance.
    #[instrument(skip(self))]
    pub async fn delete_instance(&self, instance_id: InstanceId) -> RosterSyncResult<bool> {
        let held = self.locks.acquire(instance_id).await?;
        let result = self.remove(instance_id).await;
        held.release().await;
        let deleted = result?;
        self.locks.forget(instance_id);

        if deleted {
            info!(instance_id, "Deleted roster instance");
        }
        Ok(deleted)
    }

    async fn remove(&self, instance_id: InstanceId) -> RosterSyncResult<bool> {
        self.states.delete(instance_id).await?;
        self.instances.delete(instance_id).await
    }

    /// Courses the account teaches upstream, for the instance creation form.
    pub async fn available_courses(&self, account_identity: &str) -> Vec<CourseOption> {
        let Some(token) = self.tokens.fetch_token().await else {
            warn!(account = %account_identity, "No token, course list unavailable");
            return Vec::new();
        };

        self.roster
            .fetch_courses(account_identity, &token)
            .await
            .into_iter()
            .map(|mapping| CourseOption {
                key: mapping.selection_key(),
                label: mapping.label()
            })
            .collect()
    }

    pub async fn exceptions(&self, instance_id: InstanceId) -> RosterSyncResult<Vec<ExceptionRow>> {
        self.load_instance(instance_id).await?;
        Ok(self
            .states
            .get(instance_id)
            .await?
            .map(|state| state.exceptions())
            .unwrap_or_default())
    }

    /// Caller holds the instance lock.
    async fn run(
        &self,
        instance: &ReconciliationInstance,
        previous: Option<&SyncState>,
        mapping: Option<&ExternalCourseMapping>
    ) -> RosterSyncResult<SyncOutcome> {
        let skipped = |reason| {
            info!(instance_id = instance.id, %reason, "Skipping reconciliation");
            Ok(SyncOutcome::Skipped {
                instance_id: instance.id,
                reason
            })
        };

        let course_id = mapping
            .or(previous.map(|state| &state.mapping))
            .map(|m| m.external_course_id.as_str())
            .unwrap_or_default();
        if course_id.is_empty() {
            return skipped(SkipReason::NoCourseMapping);
        }

        let Some(token) = self.tokens.fetch_token().await else {
            return skipped(SkipReason::TokenUnavailable);
        };

        let fetched = self.roster.fetch_members(course_id, &token).await;
        if !fetched.ok && self.config.sync.on_fetch_failure == FetchFailurePolicy::Skip {
            return skipped(SkipReason::FetchUnavailable);
        }

        let mut report = SyncReport::new(instance.id);
        let reconciliation = self
            .engine
            .reconcile(instance, &fetched.payload, mapping, previous, Utc::now())
            .await;
        self.states.upsert(&reconciliation.state).await?;

        report.synced = reconciliation.state.success.len();
        report.errors = reconciliation.state.errors.len();
        report.stats = reconciliation.stats;
        report.complete();
        Ok(SyncOutcome::Reconciled(report))
    }
}

fn record_run(result: &RosterSyncResult<SyncOutcome>, started: Instant) {
    let outcome = match result {
        Ok(outcome) => outcome.label(),
        Err(_) => "failed"
    };
    counter!("roster_sync_runs_total", "outcome" => outcome).increment(1);
    histogram!("roster_sync_run_duration_seconds").record(started.elapsed().as_secs_f64());
}
