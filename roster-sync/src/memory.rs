//! In-process implementations of the store traits.
//!
//! Used by the test suites and by embedders that keep host state in memory.

use crate::error::{RosterSyncError, RosterSyncResult};
use crate::membership::{Activation, MembershipStore, WelcomeNotifier};
use crate::resolver::IdentityResolver;
use crate::state::SyncState;
use crate::store::{InstanceStore, SyncStateStore};
use crate::types::{
    AccountId, CohortId, CourseId, GroupId, InstanceId, MembershipRecord, MembershipStatus,
    NewInstance, ReconciliationInstance, RoleId, ValidityWindow, WelcomeMessagePolicy
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

fn unavailable() -> RosterSyncError {
    RosterSyncError::DatabaseError(sqlx::Error::PoolTimedOut)
}

pub struct InMemoryDirectory {
    accounts: RwLock<HashMap<String, AccountId>>,
    next_id: AtomicI64,
    offline: AtomicBool
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            offline: AtomicBool::new(false)
        }
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_account(&self, username: &str) -> AccountId {
        let mut accounts = self.accounts.write().await;
        if let Some(id) = accounts.get(username) {
            return *id;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        accounts.insert(username.to_string(), id);
        id
    }

    pub async fn remove_account(&self, username: &str) -> Option<AccountId> {
        self.accounts.write().await.remove(username)
    }

    /// Makes every lookup fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityResolver for InMemoryDirectory {
    async fn resolve(&self, identifier: &str) -> RosterSyncResult<Option<AccountId>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.accounts.read().await.get(identifier).copied())
    }
}

pub struct InMemoryMembershipStore {
    records: RwLock<HashMap<(InstanceId, AccountId), MembershipRecord>>,
    groups: RwLock<HashMap<GroupId, (CourseId, String)>>,
    group_members: RwLock<HashMap<(GroupId, AccountId), InstanceId>>,
    cohorts: RwLock<HashSet<(CohortId, AccountId)>>,
    failing: RwLock<HashSet<AccountId>>,
    next_group: AtomicI64
}

impl Default for InMemoryMembershipStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            group_members: RwLock::new(HashMap::new()),
            cohorts: RwLock::new(HashSet::new()),
            failing: RwLock::new(HashSet::new()),
            next_group: AtomicI64::new(1)
        }
    }
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `activate` fail for the account.
    pub async fn fail_activation_for(&self, account_id: AccountId) {
        self.failing.write().await.insert(account_id);
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    pub async fn add_to_cohort(&self, cohort_id: CohortId, account_id: AccountId) {
        self.cohorts.write().await.insert((cohort_id, account_id));
    }

    /// Seeds a record as another enrolment flow would.
    pub async fn insert_record(&self, record: MembershipRecord) {
        self.records
            .write()
            .await
            .insert((record.instance_id, record.account_id), record);
    }

    pub async fn record(
        &self,
        instance_id: InstanceId,
        account_id: AccountId
    ) -> Option<MembershipRecord> {
        self.records
            .read()
            .await
            .get(&(instance_id, account_id))
            .cloned()
    }

    pub async fn records(&self) -> Vec<MembershipRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| (r.instance_id, r.account_id));
        records
    }

    pub async fn group_members_of(&self, group_id: GroupId) -> Vec<AccountId> {
        let mut members: Vec<_> = self
            .group_members
            .read()
            .await
            .keys()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, account)| *account)
            .collect();
        members.sort_unstable();
        members
    }

    pub async fn group_name(&self, group_id: GroupId) -> Option<String> {
        self.groups
            .read()
            .await
            .get(&group_id)
            .map(|(_, name)| name.clone())
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn membership(
        &self,
        instance_id: InstanceId,
        account_id: AccountId
    ) -> RosterSyncResult<Option<MembershipRecord>> {
        Ok(self.record(instance_id, account_id).await)
    }

    async fn activate(
        &self,
        instance: &ReconciliationInstance,
        account_id: AccountId,
        role: RoleId,
        window: ValidityWindow
    ) -> RosterSyncResult<Activation> {
        if self.failing.read().await.contains(&account_id) {
            return Err(unavailable());
        }

        let mut records = self.records.write().await;
        let key = (instance.id, account_id);
        let activation = if records.contains_key(&key) {
            Activation::Reactivated
        } else {
            Activation::Created
        };
        records.insert(
            key,
            MembershipRecord {
                instance_id: instance.id,
                account_id,
                status: MembershipStatus::Active,
                role,
                window
            }
        );
        Ok(activation)
    }

    async fn suspend(&self, instance_id: InstanceId, account_id: AccountId) -> RosterSyncResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&(instance_id, account_id)) {
            Some(record) if record.is_active() => {
                record.status = MembershipStatus::Suspended;
                Ok(true)
            }
            _ => Ok(false)
        }
    }

    async fn count_active(&self, instance_id: InstanceId) -> RosterSyncResult<u64> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.instance_id == instance_id && r.is_active())
            .count() as u64)
    }

    async fn is_cohort_member(
        &self,
        cohort_id: CohortId,
        account_id: AccountId
    ) -> RosterSyncResult<bool> {
        Ok(self.cohorts.read().await.contains(&(cohort_id, account_id)))
    }

    async fn is_group_member(&self, group_id: GroupId, account_id: AccountId) -> RosterSyncResult<bool> {
        Ok(self
            .group_members
            .read()
            .await
            .contains_key(&(group_id, account_id)))
    }

    async fn add_group_member(
        &self,
        group_id: GroupId,
        account_id: AccountId,
        instance_id: InstanceId
    ) -> RosterSyncResult<()> {
        self.group_members
            .write()
            .await
            .entry((group_id, account_id))
            .or_insert(instance_id);
        Ok(())
    }

    async fn create_group(&self, course_id: CourseId, name: &str) -> RosterSyncResult<GroupId> {
        let id = self.next_group.fetch_add(1, Ordering::SeqCst);
        self.groups
            .write()
            .await
            .insert(id, (course_id, name.to_string()));
        Ok(id)
    }

    async fn move_group_members(
        &self,
        instance_id: InstanceId,
        group_id: GroupId
    ) -> RosterSyncResult<u64> {
        let mut members = self.group_members.write().await;
        let owned: Vec<(GroupId, AccountId)> = members
            .iter()
            .filter(|((group, _), item)| **item == instance_id && *group != group_id)
            .map(|(key, _)| *key)
            .collect();

        let mut moved = 0;
        for key in owned {
            members.remove(&key);
            if let std::collections::hash_map::Entry::Vacant(slot) = members.entry((group_id, key.1)) {
                slot.insert(instance_id);
                moved += 1;
            }
        }
        Ok(moved)
    }
}

/// Records welcome hooks instead of delivering them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<(InstanceId, AccountId, WelcomeMessagePolicy)>>
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(InstanceId, AccountId, WelcomeMessagePolicy)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl WelcomeNotifier for RecordingNotifier {
    async fn send_welcome(
        &self,
        instance: &ReconciliationInstance,
        account_id: AccountId,
        policy: WelcomeMessagePolicy
    ) -> RosterSyncResult<()> {
        self.sent.write().await.push((instance.id, account_id, policy));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySyncStateStore {
    states: RwLock<HashMap<InstanceId, SyncState>>,
    writes: AtomicUsize
}

impl InMemorySyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncStateStore for InMemorySyncStateStore {
    async fn get(&self, instance_id: InstanceId) -> RosterSyncResult<Option<SyncState>> {
        Ok(self.states.read().await.get(&instance_id).cloned())
    }

    async fn upsert(&self, state: &SyncState) -> RosterSyncResult<()> {
        let mut states = self.states.write().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        match states.get_mut(&state.instance_id) {
            Some(existing) => {
                existing.success = state.success.clone();
                existing.errors = state.errors.clone();
                existing.last_modified = state.last_modified;
            }
            None => {
                states.insert(state.instance_id, state.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, instance_id: InstanceId) -> RosterSyncResult<bool> {
        Ok(self.states.write().await.remove(&instance_id).is_some())
    }
}

pub struct InMemoryInstanceStore {
    instances: RwLock<BTreeMap<InstanceId, ReconciliationInstance>>,
    next_id: AtomicI64
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self {
            instances: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1)
        }
    }
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn get(&self, instance_id: InstanceId) -> RosterSyncResult<Option<ReconciliationInstance>> {
        Ok(self.instances.read().await.get(&instance_id).cloned())
    }

    async fn list_enabled(&self) -> RosterSyncResult<Vec<ReconciliationInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.enabled)
            .cloned()
            .collect())
    }

    async fn insert(
        &self,
        instance: &NewInstance,
        group_id: Option<GroupId>
    ) -> RosterSyncResult<ReconciliationInstance> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created = instance.clone().into_instance(id, group_id);
        self.instances.write().await.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, instance: &ReconciliationInstance) -> RosterSyncResult<()> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(&instance.id) {
            Some(existing) => {
                *existing = instance.clone();
                Ok(())
            }
            None => Err(RosterSyncError::InstanceNotFound(instance.id))
        }
    }

    async fn delete(&self, instance_id: InstanceId) -> RosterSyncResult<bool> {
        Ok(self.instances.write().await.remove(&instance_id).is_some())
    }
}
