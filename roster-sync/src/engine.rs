//! The reconciliation core.
//!
//! One run turns the previous snapshot plus a freshly fetched roster into the
//! next snapshot, issuing activate/suspend transitions along the way. Every
//! member-level failure ends up in the error map; nothing here returns an
//! error to the caller.

use crate::membership::{Activation, MembershipStore, WelcomeNotifier};
use crate::resolver::IdentityResolver;
use crate::state::{ErrorEntry, SyncState};
use crate::types::{
    AccountId, ExternalCourseMapping, ExternalMember, ReconciliationInstance, RoleId,
    WelcomeMessagePolicy
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-run transition counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub members_seen: usize,
    pub created: usize,
    pub reactivated: usize,
    pub unchanged: usize,
    pub not_found: usize,
    pub refused: usize,
    pub failed: usize,
    pub departed: usize,
    pub suspended: usize,
    pub healed: usize
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Snapshot to commit.
    pub state: SyncState,
    pub stats: RunStats
}

enum Applied {
    Unchanged,
    Activated(Activation),
    Refused(&'static str),
    Failed
}

pub struct ReconciliationEngine {
    resolver: Arc<dyn IdentityResolver>,
    memberships: Arc<dyn MembershipStore>,
    notifier: Option<Arc<dyn WelcomeNotifier>>
}

impl ReconciliationEngine {
    pub fn new(resolver: Arc<dyn IdentityResolver>, memberships: Arc<dyn MembershipStore>) -> Self {
        Self {
            resolver,
            memberships,
            notifier: None
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn WelcomeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Computes the next snapshot for `instance` and applies the membership
    /// transitions it implies.
    ///
    /// `mapping` is only used when no previous snapshot exists. The caller
    /// persists `Reconciliation::state` in a single upsert.
    pub async fn reconcile(
        &self,
        instance: &ReconciliationInstance,
        members: &[ExternalMember],
        mapping: Option<&ExternalCourseMapping>,
        previous: Option<&SyncState>,
        now: DateTime<Utc>
    ) -> Reconciliation {
        let mut stats = RunStats {
            members_seen: members.len(),
            ..Default::default()
        };
        let mut success = BTreeSet::new();
        let mut errors = BTreeMap::new();
        let releasing = self.releasing_seats(instance, members, previous).await;

        for member in members {
            let role = member.role.unwrap_or(instance.default_role);

            let Some(account_id) = self.resolve(&member.identifier).await else {
                debug!(identifier = %member.identifier, "No local account for roster member");
                errors.insert(
                    member.identifier.clone(),
                    ErrorEntry::not_found(&member.identifier, role)
                );
                stats.not_found += 1;
                continue;
            };

            match self.apply(instance, account_id, role, releasing, now).await {
                Applied::Unchanged => {
                    stats.unchanged += 1;
                    success.insert(member.identifier.clone());
                }
                Applied::Activated(activation) => {
                    match activation {
                        Activation::Created => stats.created += 1,
                        Activation::Reactivated => stats.reactivated += 1
                    }
                    counter!("roster_sync_transitions_total", "kind" => activation_kind(activation))
                        .increment(1);
                    success.insert(member.identifier.clone());
                }
                Applied::Refused(reason) => {
                    debug!(
                        identifier = %member.identifier,
                        instance_id = instance.id,
                        reason,
                        "Membership refused"
                    );
                    stats.refused += 1;
                }
                Applied::Failed => stats.failed += 1
            }
        }

        if let Some(previous) = previous {
            for (identifier, entry) in &previous.errors {
                errors
                    .entry(identifier.clone())
                    .or_insert_with(|| entry.clone());
            }

            for identifier in previous.success.difference(&success) {
                stats.departed += 1;
                if self.suspend_departed(instance, identifier).await {
                    stats.suspended += 1;
                    counter!("roster_sync_transitions_total", "kind" => "suspended").increment(1);
                }
                errors.insert(
                    identifier.clone(),
                    ErrorEntry::exit(identifier, instance.default_role)
                );
            }
        }

        let mut healed = Vec::new();
        for identifier in errors.keys() {
            if self.has_active_membership(instance, identifier).await {
                healed.push(identifier.clone());
            }
        }
        stats.healed = healed.len();
        for identifier in healed {
            errors.remove(&identifier);
        }

        let mut state = match previous {
            Some(previous) => previous.clone(),
            None => SyncState::new(instance.id, mapping.cloned().unwrap_or_default(), now)
        };
        state.success = success;
        state.errors = errors;
        state.last_modified = now;

        info!(
            instance_id = instance.id,
            synced = state.success.len(),
            errors = state.errors.len(),
            created = stats.created,
            reactivated = stats.reactivated,
            departed = stats.departed,
            "Reconciliation computed"
        );

        Reconciliation { state, stats }
    }

    /// Lookup failures count as unresolved.
    async fn resolve(&self, identifier: &str) -> Option<AccountId> {
        match self.resolver.resolve(identifier).await {
            Ok(account) => account,
            Err(e) => {
                warn!(identifier, error = %e, "Identity lookup failed");
                None
            }
        }
    }

    async fn apply(
        &self,
        instance: &ReconciliationInstance,
        account_id: AccountId,
        role: RoleId,
        releasing: u64,
        now: DateTime<Utc>
    ) -> Applied {
        let existing = match self.memberships.membership(instance.id, account_id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(instance_id = instance.id, account_id, error = %e, "Failed to read membership");
                return Applied::Failed;
            }
        };

        if existing.as_ref().is_some_and(|m| m.is_active()) {
            self.ensure_group(instance, account_id).await;
            return Applied::Unchanged;
        }

        if let Some(reason) = self
            .refusal(instance, account_id, existing.is_none(), releasing)
            .await {
            return Applied::Refused(reason);
        }

        let window = instance.validity_window(now);
        let activation = match self
            .memberships
            .activate(instance, account_id, role, window)
            .await
        {
            Ok(activation) => activation,
            Err(e) => {
                warn!(instance_id = instance.id, account_id, error = %e, "Failed to activate membership");
                return Applied::Failed;
            }
        };

        self.ensure_group(instance, account_id).await;
        if activation == Activation::Created {
            self.welcome(instance, account_id).await;
        }
        Applied::Activated(activation)
    }

    /// Instance-level gates checked before any activation.
    ///
    /// `releasing` active seats belong to departures that this run suspends
    /// later and do not count against the capacity limit.
    async fn refusal(
        &self,
        instance: &ReconciliationInstance,
        account_id: AccountId,
        brand_new: bool,
        releasing: u64
    ) -> Option<&'static str> {
        if brand_new && !instance.new_enrolments_allowed {
            return Some("new enrolments disabled");
        }

        if let Some(limit) = instance.max_enrolled.filter(|limit| *limit > 0) {
            match self.memberships.count_active(instance.id).await {
                Ok(active) if active.saturating_sub(releasing) >= u64::from(limit) => {
                    return Some("capacity reached");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(instance_id = instance.id, error = %e, "Failed to count memberships");
                    return Some("capacity unknown");
                }
            }
        }

        if let Some(cohort_id) = instance.cohort_id {
            match self.memberships.is_cohort_member(cohort_id, account_id).await {
                Ok(true) => {}
                Ok(false) => return Some("outside cohort"),
                Err(e) => {
                    warn!(cohort_id, account_id, error = %e, "Failed to check cohort");
                    return Some("cohort unknown");
                }
            }
        }

        None
    }

    /// Active members of the previous success set missing from `members`.
    async fn releasing_seats(
        &self,
        instance: &ReconciliationInstance,
        members: &[ExternalMember],
        previous: Option<&SyncState>
    ) -> u64 {
        let (Some(_), Some(previous)) = (instance.max_enrolled, previous) else {
            return 0;
        };

        let listed: BTreeSet<&str> = members.iter().map(|m| m.identifier.as_str()).collect();
        let mut releasing = 0;
        for identifier in &previous.success {
            if !listed.contains(identifier.as_str())
                && self.has_active_membership(instance, identifier).await
            {
                releasing += 1;
            }
        }
        releasing
    }

    async fn ensure_group(&self, instance: &ReconciliationInstance, account_id: AccountId) {
        let Some(group_id) = instance.group_id else {
            return;
        };

        let result = match self.memberships.is_group_member(group_id, account_id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.memberships
                    .add_group_member(group_id, account_id, instance.id)
                    .await
            }
            Err(e) => Err(e)
        };

        if let Err(e) = result {
            warn!(instance_id = instance.id, group_id, account_id, error = %e, "Failed to assign group");
        }
    }

    async fn welcome(&self, instance: &ReconciliationInstance, account_id: AccountId) {
        if instance.welcome_message == WelcomeMessagePolicy::Disabled {
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier
            .send_welcome(instance, account_id, instance.welcome_message)
            .await
        {
            warn!(instance_id = instance.id, account_id, error = %e, "Welcome hook failed");
        }
    }

    async fn suspend_departed(&self, instance: &ReconciliationInstance, identifier: &str) -> bool {
        let Some(account_id) = self.resolve(identifier).await else {
            return false;
        };
        match self.memberships.suspend(instance.id, account_id).await {
            Ok(suspended) => suspended,
            Err(e) => {
                warn!(instance_id = instance.id, account_id, error = %e, "Failed to suspend membership");
                false
            }
        }
    }

    async fn has_active_membership(&self, instance: &ReconciliationInstance, identifier: &str) -> bool {
        let Ok(Some(account_id)) = self.resolver.resolve(identifier).await else {
            return false;
        };
        matches!(
            self.memberships.membership(instance.id, account_id).await,
            Ok(Some(record)) if record.is_active()
        )
    }
}

fn activation_kind(activation: Activation) -> &'static str {
    match activation {
        Activation::Created => "created",
        Activation::Reactivated => "reactivated"
    }
}
