//! Durable rule storage
//!
//! The engine only owns the in-memory rule index. Rows live behind the
//! [`RuleStore`] trait; [`YamlRuleStore`] is the file-backed implementation
//! used by the bot.

use crate::blacklist::{Identity, Rule, RuleDraft, RuleId, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

/// Durable storage boundary for blacklist rules and the identities they reference
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load every stored rule with its identities resolved, in insertion order
    async fn load_all(&self) -> StoreResult<Vec<Rule>>;

    /// Store a new rule and return it with its assigned id
    async fn persist(&self, draft: RuleDraft) -> StoreResult<Rule>;

    /// Delete a rule by id
    async fn delete(&self, id: RuleId) -> StoreResult<()>;

    /// Find every identity whose name matches, case-insensitively
    async fn find_identities(&self, name: &str) -> StoreResult<Vec<Identity>>;

    /// Record an identity, or its new name if it was renamed
    async fn remember_identity(&self, identity: Identity) -> StoreResult<()>;
}

/// Stored form of a rule, referencing identities by id
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleRow {
    id: RuleId,
    target_user_id: Option<u64>,
    channel_id: Option<u64>,
    command: Option<String>,
    expires_on: Option<DateTime<Utc>>,
    is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: RuleId,
    identities: Vec<Identity>,
    rules: Vec<RuleRow>,
}

impl StoreFile {
    fn identity(&self, id: u64) -> Option<&Identity> {
        self.identities.iter().find(|identity| identity.id == id)
    }

    /// Insert or rename; returns whether anything changed
    fn upsert_identity(&mut self, identity: &Identity) -> bool {
        if let Some(known) = self.identities.iter_mut().find(|known| known.id == identity.id) {
            if known.name == identity.name {
                return false;
            }
            known.name.clone_from(&identity.name);
            return true;
        }
        self.identities.push(identity.clone());
        true
    }

    /// Join a row with its identities. A dangling reference yields `None` so
    /// the rule is dropped rather than widened into a wildcard.
    fn resolve(&self, row: &RuleRow) -> Option<Rule> {
        let target_user = match row.target_user_id {
            Some(id) => Some(self.identity(id)?.clone()),
            None => None,
        };
        let target_channel = match row.channel_id {
            Some(id) => Some(self.identity(id)?.clone()),
            None => None,
        };
        Some(Rule {
            id: row.id,
            target_user,
            target_channel,
            command: row.command.clone(),
            expires_on: row.expires_on,
            is_active: row.is_active,
        })
    }
}

/// Rule store backed by a single YAML file
pub struct YamlRuleStore {
    path: PathBuf,
    state: Mutex<StoreFile>,
}

impl YamlRuleStore {
    /// Open the store at `path`, starting empty if the file doesn't exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_yaml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, file: &StoreFile) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let yaml = serde_yaml::to_string(file)?;
        tokio::fs::write(&self.path, yaml).await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for YamlRuleStore {
    async fn load_all(&self) -> StoreResult<Vec<Rule>> {
        let state = self.state.lock().await;
        let rules = state
            .rules
            .iter()
            .filter_map(|row| {
                let rule = state.resolve(row);
                if rule.is_none() {
                    warn!(rule_id = row.id, "Skipping rule referencing an unknown identity");
                }
                rule
            })
            .collect();
        Ok(rules)
    }

    async fn persist(&self, draft: RuleDraft) -> StoreResult<Rule> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();

        for identity in draft.target_user.iter().chain(draft.target_channel.iter()) {
            next.upsert_identity(identity);
        }
        next.next_id += 1;
        let id = next.next_id;
        next.rules.push(RuleRow {
            id,
            target_user_id: draft.target_user.as_ref().map(|user| user.id),
            channel_id: draft.target_channel.as_ref().map(|channel| channel.id),
            command: draft.command.clone(),
            expires_on: draft.expires_on,
            is_active: true,
        });

        self.write(&next).await?;
        *state = next;
        Ok(draft.into_rule(id))
    }

    async fn delete(&self, id: RuleId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if !state.rules.iter().any(|row| row.id == id) {
            return Err(StoreError::NotFound(id));
        }

        let mut next = state.clone();
        next.rules.retain(|row| row.id != id);
        self.write(&next).await?;
        *state = next;
        Ok(())
    }

    async fn find_identities(&self, name: &str) -> StoreResult<Vec<Identity>> {
        let state = self.state.lock().await;
        Ok(state
            .identities
            .iter()
            .filter(|identity| identity.is_named(name))
            .cloned()
            .collect())
    }

    async fn remember_identity(&self, identity: Identity) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state
            .identity(identity.id)
            .is_some_and(|known| known.name == identity.name)
        {
            return Ok(());
        }
        let mut next = state.clone();
        if !next.upsert_identity(&identity) {
            return Ok(());
        }
        self.write(&next).await?;
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(user: Option<Identity>, channel: Option<Identity>) -> RuleDraft {
        RuleDraft::new(user, channel, Some("ban".to_string()), None)
    }

    #[tokio::test]
    async fn test_persist_assigns_ids_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("blacklist.yaml");

        let store = YamlRuleStore::open(&path).await.unwrap();
        let first = store
            .persist(draft(Some(Identity::new(10, "bob")), None))
            .await
            .unwrap();
        let second = store
            .persist(draft(None, Some(Identity::new(20, "foo"))))
            .await
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let reopened = YamlRuleStore::open(&path).await.unwrap();
        let rules = reopened.load_all().await.unwrap();
        assert_eq!(rules, vec![first, second]);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlRuleStore::open(dir.path().join("rules.yaml"))
            .await
            .unwrap();
        let rule = store
            .persist(draft(Some(Identity::new(10, "bob")), None))
            .await
            .unwrap();

        store.delete(rule.id).await.unwrap();
        assert!(matches!(
            store.delete(rule.id).await,
            Err(StoreError::NotFound(id)) if id == rule.id
        ));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_identities_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlRuleStore::open(dir.path().join("rules.yaml"))
            .await
            .unwrap();
        store.remember_identity(Identity::new(1, "Bob")).await.unwrap();
        store.remember_identity(Identity::new(2, "BOB")).await.unwrap();
        store.remember_identity(Identity::new(3, "alice")).await.unwrap();

        assert_eq!(store.find_identities("bob").await.unwrap().len(), 2);
        assert_eq!(store.find_identities("Alice").await.unwrap().len(), 1);
        assert!(store.find_identities("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_updates_referencing_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlRuleStore::open(dir.path().join("rules.yaml"))
            .await
            .unwrap();
        store
            .persist(draft(Some(Identity::new(10, "bob")), None))
            .await
            .unwrap();
        store
            .remember_identity(Identity::new(10, "robert"))
            .await
            .unwrap();

        let rules = store.load_all().await.unwrap();
        assert_eq!(rules[0].target_user, Some(Identity::new(10, "robert")));
    }

    #[tokio::test]
    async fn test_dangling_identity_skips_rule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        let yaml = "next_id: 1\nidentities: []\nrules:\n- id: 1\n  target_user_id: 99\n  channel_id: null\n  command: null\n  expires_on: null\n  is_active: true\n";
        std::fs::write(&path, yaml).unwrap();

        let store = YamlRuleStore::open(&path).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, "rules: [not, a, row").unwrap();

        assert!(matches!(
            YamlRuleStore::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
