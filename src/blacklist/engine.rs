//! Blacklist rule engine
//!
//! Holds the index of active rules, answers "is this action denied?" on every
//! dispatch and removes rules lazily once they expire. Expired rules are handed
//! to the [`ExpiryCollector`] and deleted from storage by the sweeper.
//!
//! Two locks are involved. The index lock is held only for in-memory reads and
//! swaps, never across I/O, so the match path never waits on storage. The
//! expiry lock serializes everything that touches storage and the index
//! together: reload, create, remove and sweep.

use crate::BLACKLIST_TARGET;
use crate::blacklist::{
    Action, BlacklistResult, CommandInterceptor, ExpiryCollector, Identity, Rule, RuleDraft,
    RuleId, RuleStore, StoreError, Verdict,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids durably deleted
    pub deleted: Vec<RuleId>,
    /// Ids whose deletion failed and were left in storage
    pub failed: Vec<RuleId>,
}

impl SweepReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.failed.is_empty()
    }
}

/// In-memory rule index backed by a durable store
pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    rules: RwLock<Vec<Rule>>,
    expiry_lock: Mutex<()>,
    collector: ExpiryCollector,
}

impl RuleEngine {
    /// Create an engine with an empty index. Call [`RuleEngine::reload`] to
    /// populate it from the store.
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            rules: RwLock::new(Vec::new()),
            expiry_lock: Mutex::new(()),
            collector: ExpiryCollector::new(),
        }
    }

    /// The durable store behind this engine
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    fn read_rules(&self) -> RwLockReadGuard<'_, Vec<Rule>> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rules(&self) -> RwLockWriteGuard<'_, Vec<Rule>> {
        self.rules.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current index, in insertion order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Rule> {
        self.read_rules().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_rules().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_rules().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: RuleId) -> bool {
        self.read_rules().iter().any(|rule| rule.id == id)
    }

    /// Remove a rule from the index, returning it if it was present
    fn take(&self, id: RuleId) -> Option<Rule> {
        let mut rules = self.write_rules();
        let position = rules.iter().position(|rule| rule.id == id)?;
        Some(rules.remove(position))
    }

    /// Replace the whole index with the store's contents
    ///
    /// # Errors
    /// Returns an error if the store cannot be read; the index is left as it was.
    pub async fn reload(&self) -> BlacklistResult<usize> {
        let _guard = self.expiry_lock.lock().await;
        let loaded = self.store.load_all().await?;

        let mut seen = HashSet::new();
        let rules: Vec<Rule> = loaded
            .into_iter()
            .filter(|rule| seen.insert(rule.id))
            .collect();
        let count = rules.len();
        *self.write_rules() = rules;

        info!(target: BLACKLIST_TARGET, rules = count, event = "reload", "Blacklist reloaded");
        Ok(count)
    }

    /// Persist a new rule and append it to the index
    ///
    /// # Errors
    /// Returns an error if the store rejects the rule; nothing is indexed then.
    pub async fn create(&self, draft: RuleDraft) -> BlacklistResult<Rule> {
        let _guard = self.expiry_lock.lock().await;
        let rule = self.store.persist(draft).await?;
        self.write_rules().push(rule.clone());
        Ok(rule)
    }

    /// Append an already persisted rule unless its id is indexed already
    pub async fn add(&self, rule: Rule) -> bool {
        let _guard = self.expiry_lock.lock().await;
        let mut rules = self.write_rules();
        if rules.iter().any(|known| known.id == rule.id) {
            return false;
        }
        rules.push(rule);
        true
    }

    /// Delete a rule from storage and drop it from the index
    ///
    /// Returns the indexed rule, or `None` when the row was deleted but the
    /// rule had already left the index (for instance through expiry).
    ///
    /// # Errors
    /// Returns an error if the rule is unknown to both the store and the index,
    /// or if the store fails; a failed delete leaves the rule indexed.
    pub async fn remove(&self, id: RuleId) -> BlacklistResult<Option<Rule>> {
        let _guard = self.expiry_lock.lock().await;
        match self.store.delete(id).await {
            Ok(()) => Ok(self.take(id)),
            Err(StoreError::NotFound(_)) if self.contains(id) => Ok(self.take(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a user or channel identity and carry a rename into the index
    ///
    /// # Errors
    /// Returns an error if the store cannot record the identity; the index is
    /// left untouched then.
    pub async fn remember_identity(&self, identity: Identity) -> BlacklistResult<usize> {
        let _guard = self.expiry_lock.lock().await;
        self.store.remember_identity(identity.clone()).await?;

        let mut renamed = 0;
        for rule in self.write_rules().iter_mut() {
            for target in [&mut rule.target_user, &mut rule.target_channel]
                .into_iter()
                .flatten()
            {
                if target.id == identity.id && target.name != identity.name {
                    target.name.clone_from(&identity.name);
                    renamed += 1;
                }
            }
        }
        if renamed > 0 {
            info!(
                target: BLACKLIST_TARGET,
                id = identity.id,
                name = %identity.name,
                rules = renamed,
                event = "renamed",
                "Identity renamed in blacklist rules"
            );
        }
        Ok(renamed)
    }

    /// Match a rule against an action at time `now`
    ///
    /// An expired rule is removed from the index and queued for deletion as a
    /// side effect, and never matches.
    pub fn matches_at(&self, rule: &Rule, action: &Action, now: DateTime<Utc>) -> bool {
        if !rule.is_active || !rule.is_valid() {
            return false;
        }
        if rule.is_expired_at(now) {
            self.expire(rule.id);
            return false;
        }
        rule.applies_to(action)
    }

    pub fn matches(&self, rule: &Rule, action: &Action) -> bool {
        self.matches_at(rule, action, Utc::now())
    }

    /// Only the caller that actually removes the rule queues it, so a rule is
    /// queued at most once per index entry.
    fn expire(&self, id: RuleId) {
        if let Some(rule) = self.take(id) {
            debug!(
                target: BLACKLIST_TARGET,
                rule_id = rule.id,
                event = "expired",
                "Rule expired, queued for deletion"
            );
            self.collector.push(rule);
        }
    }

    /// Find the first rule, in insertion order, that denies the action at `now`
    pub fn evaluate_at(&self, action: &Action, now: DateTime<Utc>) -> Option<Rule> {
        let denying = self
            .snapshot()
            .into_iter()
            .find(|rule| self.matches_at(rule, action, now))?;

        info!(
            target: BLACKLIST_TARGET,
            rule_id = denying.id,
            user = %action.user,
            channel = action.channel.as_deref().unwrap_or("DM"),
            command = %action.command,
            event = "denied",
            "Ignored {}'s command ({:?})",
            action.user,
            action.command
        );
        Some(denying)
    }

    /// Whether the action is denied right now
    pub fn evaluate(&self, action: &Action) -> bool {
        self.evaluate_at(action, Utc::now()).is_some()
    }

    /// Durably delete every rule queued as expired since the last sweep
    ///
    /// A failed delete is logged and skipped; it never aborts the batch.
    pub async fn sweep_expired(&self) -> SweepReport {
        let batch = self.collector.drain();
        let mut report = SweepReport::default();
        if batch.is_empty() {
            return report;
        }

        let _guard = self.expiry_lock.lock().await;
        for rule in batch {
            match self.store.delete(rule.id).await {
                Ok(()) => report.deleted.push(rule.id),
                Err(e) => {
                    warn!(
                        target: BLACKLIST_TARGET,
                        rule_id = rule.id,
                        error = %e,
                        event = "sweep_failed",
                        "Failed to delete expired rule"
                    );
                    report.failed.push(rule.id);
                }
            }
        }

        info!(
            target: BLACKLIST_TARGET,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            event = "sweep",
            "Expired rules swept"
        );
        report
    }
}

impl CommandInterceptor for RuleEngine {
    fn name(&self) -> &'static str {
        "blacklist"
    }

    fn intercept(&self, action: &Action) -> Verdict {
        if self.evaluate(action) {
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }
}
