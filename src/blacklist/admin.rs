//! Applying `plonk` requests
//!
//! Resolves the names in a [`PlonkRequest`] to known identities, then creates
//! one rule per channel in scope (or a single global rule).
//!
//! Channels are applied one at a time and the first failure stops the request.
//! Rules already created for earlier channels stay in place.
//!
//! Bot owners manage every rule. Anyone else is confined to rules scoped to the
//! channel they are asking from.

use crate::BLACKLIST_TARGET;
use crate::blacklist::{
    BlacklistError, BlacklistResult, CommandTarget, Identity, PlonkRequest, Rule, RuleDraft,
    RuleEngine, RuleId, Scope, StoreError, UserTarget,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Who is managing rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    /// Name of the connected channel the request came from
    pub channel: Option<String>,
    pub is_owner: bool,
}

impl Operator {
    /// A bot owner, allowed any scope
    #[must_use]
    pub fn owner() -> Self {
        Self {
            channel: None,
            is_owner: true,
        }
    }

    /// A channel moderator, confined to `channel`
    #[must_use]
    pub fn moderator(channel: Option<String>) -> Self {
        Self {
            channel,
            is_owner: false,
        }
    }

    fn is_home(&self, channel: &str) -> bool {
        self.channel
            .as_deref()
            .is_some_and(|home| home.eq_ignore_ascii_case(channel))
    }

    /// Whether this operator may see and remove `rule`
    #[must_use]
    pub fn can_manage(&self, rule: &Rule) -> bool {
        self.is_owner
            || rule
                .target_channel
                .as_ref()
                .is_some_and(|channel| self.is_home(&channel.name))
    }

    /// Check that every channel a request touches is this operator's own
    ///
    /// # Errors
    /// Returns [`BlacklistError::OutOfScope`] naming the first foreign scope.
    pub fn authorize(&self, request: &PlonkRequest) -> BlacklistResult<()> {
        if self.is_owner {
            return Ok(());
        }
        match &request.scope {
            Scope::Global => Err(BlacklistError::OutOfScope("global".to_string())),
            Scope::Channels(channels) => channels
                .iter()
                .find(|channel| !self.is_home(channel))
                .map_or(Ok(()), |channel| {
                    Err(BlacklistError::OutOfScope(channel.clone()))
                }),
        }
    }
}

/// Creates rules from operator requests
#[derive(Clone)]
pub struct RuleAdmin {
    engine: Arc<RuleEngine>,
}

impl RuleAdmin {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine }
    }

    /// Create the rules described by `request`
    ///
    /// `connected_channels` are the names of the channels the bot is currently in.
    ///
    /// # Errors
    /// Returns an authorization error before touching anything, or else the
    /// first resolution or storage error. Rules created for channels before
    /// the failing one are kept.
    pub async fn apply(
        &self,
        request: &PlonkRequest,
        operator: &Operator,
        connected_channels: &[String],
    ) -> BlacklistResult<Vec<Rule>> {
        let result = match operator.authorize(request) {
            Ok(()) => self.apply_inner(request, connected_channels).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(rules) => info!(
                target: BLACKLIST_TARGET,
                rules = rules.len(),
                scope = %request.scope,
                user = %request.user,
                command = %request.command,
                event = "created",
                "Blacklist rules created"
            ),
            Err(e) => warn!(
                target: BLACKLIST_TARGET,
                error = %e,
                scope = %request.scope,
                user = %request.user,
                command = %request.command,
                event = "rejected",
                "Blacklist request failed"
            ),
        }
        result
    }

    /// Rules in the index this operator may manage
    #[must_use]
    pub fn visible_rules(&self, operator: &Operator) -> Vec<Rule> {
        self.engine
            .snapshot()
            .into_iter()
            .filter(|rule| operator.can_manage(rule))
            .collect()
    }

    /// Remove a rule on behalf of `operator`
    ///
    /// # Errors
    /// Non-owners get [`BlacklistError::OutOfScope`] for another channel's
    /// rule, and not found for rules outside the index. Otherwise see
    /// [`RuleEngine::remove`].
    pub async fn remove(&self, id: RuleId, operator: &Operator) -> BlacklistResult<Option<Rule>> {
        if !operator.is_owner {
            let indexed = self.engine.snapshot().into_iter().find(|rule| rule.id == id);
            match indexed {
                Some(rule) if operator.can_manage(&rule) => {}
                Some(_) => return Err(BlacklistError::OutOfScope(format!("rule #{id}"))),
                None => return Err(StoreError::NotFound(id).into()),
            }
        }
        let removed = self.engine.remove(id).await?;
        info!(
            target: BLACKLIST_TARGET,
            rule_id = id,
            owner = operator.is_owner,
            event = "removed",
            "Blacklist rule removed"
        );
        Ok(removed)
    }

    async fn apply_inner(
        &self,
        request: &PlonkRequest,
        connected_channels: &[String],
    ) -> BlacklistResult<Vec<Rule>> {
        let expires_on = expiry_from(request, Utc::now())?;
        let command = match &request.command {
            CommandTarget::All => None,
            CommandTarget::Named(name) => Some(name.clone()),
        };

        let channels = match &request.scope {
            Scope::Global => {
                let target_user = self.resolve_user(&request.user).await?;
                let draft = RuleDraft::new(target_user, None, command, expires_on);
                return Ok(vec![self.engine.create(draft).await?]);
            }
            Scope::Channels(channels) => channels,
        };

        let mut created = Vec::with_capacity(channels.len());
        for channel in channels {
            let target_user = self.resolve_user(&request.user).await?;
            let target_channel = self.resolve_channel(channel, connected_channels).await?;
            let draft =
                RuleDraft::new(target_user, Some(target_channel), command.clone(), expires_on);
            created.push(self.engine.create(draft).await?);
        }
        Ok(created)
    }

    async fn resolve_user(&self, user: &UserTarget) -> BlacklistResult<Option<Identity>> {
        let UserTarget::Named(name) = user else {
            return Ok(None);
        };
        let mut found = self.engine.store().find_identities(name).await?;
        match found.len() {
            0 => Err(BlacklistError::UserNotFound(name.clone())),
            1 => Ok(found.pop()),
            _ => Err(BlacklistError::AmbiguousUser(name.clone())),
        }
    }

    async fn resolve_channel(
        &self,
        channel: &str,
        connected_channels: &[String],
    ) -> BlacklistResult<Identity> {
        if !connected_channels
            .iter()
            .any(|connected| connected.eq_ignore_ascii_case(channel))
        {
            return Err(BlacklistError::ChannelNotFound(channel.to_string()));
        }
        let mut found = self.engine.store().find_identities(channel).await?;
        match (found.pop(), found.is_empty()) {
            (Some(identity), true) => Ok(identity),
            (None, _) => Err(BlacklistError::ChannelNotFound(channel.to_string())),
            (Some(_), false) => Err(BlacklistError::AmbiguousChannel(channel.to_string())),
        }
    }
}

fn expiry_from(request: &PlonkRequest, now: DateTime<Utc>) -> BlacklistResult<Option<DateTime<Utc>>> {
    request
        .expires
        .map(|duration| {
            now.checked_add_signed(duration)
                .ok_or_else(|| BlacklistError::InvalidDuration(duration.to_string()))
        })
        .transpose()
}
