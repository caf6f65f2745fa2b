//! Blacklist rule records
//!
//! A rule is a conjunction of optional equality constraints on the user, the
//! channel and the command of an incoming action. An unset field is a wildcard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a rule by the store
pub type RuleId = u64;

/// A known user or channel, as recorded in the identity table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Platform id of the user or channel
    pub id: u64,
    /// Last name this identity was seen with
    pub name: String,
}

impl Identity {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Case-insensitive comparison against a name
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An incoming command invocation subject to authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Name of the invoking user
    pub user: String,
    /// Name of the channel, `None` outside any channel (direct messages)
    pub channel: Option<String>,
    /// Platform id of the channel, when known
    pub channel_id: Option<u64>,
    /// Name of the resolved command
    pub command: String,
}

impl Action {
    pub fn new(
        user: impl Into<String>,
        channel: Option<impl Into<String>>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            channel: channel.map(Into::into),
            channel_id: None,
            command: command.into(),
        }
    }

    #[must_use]
    pub fn with_channel_id(mut self, channel_id: u64) -> Self {
        self.channel_id = Some(channel_id);
        self
    }
}

/// Lowercase a command name and drop trailing spaces
#[must_use]
pub fn normalize_command(command: &str) -> String {
    command.trim_end_matches(' ').to_lowercase()
}

/// A rule that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDraft {
    pub target_user: Option<Identity>,
    pub target_channel: Option<Identity>,
    pub command: Option<String>,
    pub expires_on: Option<DateTime<Utc>>,
}

impl RuleDraft {
    pub fn new(
        target_user: Option<Identity>,
        target_channel: Option<Identity>,
        command: Option<String>,
        expires_on: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            target_user,
            target_channel,
            command: command.map(|c| normalize_command(&c)),
            expires_on,
        }
    }

    /// Attach the store-assigned id, producing an active rule
    #[must_use]
    pub fn into_rule(self, id: RuleId) -> Rule {
        Rule {
            id,
            target_user: self.target_user,
            target_channel: self.target_channel,
            command: self.command,
            expires_on: self.expires_on,
            is_active: true,
        }
    }
}

/// A deny-rule held in the rule index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    /// `None` matches any user
    pub target_user: Option<Identity>,
    /// `None` matches any channel
    pub target_channel: Option<Identity>,
    /// `None` matches any command
    pub command: Option<String>,
    /// `None` never expires
    pub expires_on: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Rule {
    /// A rule with no scoping field would block everything and never takes effect
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.target_user.is_some() || self.target_channel.is_some() || self.command.is_some()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on.is_some_and(|expires_on| expires_on <= now)
    }

    /// Check the scoping fields against an action, ignoring activity and expiry
    #[must_use]
    pub fn applies_to(&self, action: &Action) -> bool {
        self.check_channel(action) && self.check_command(action) && self.check_user(action)
    }

    fn check_channel(&self, action: &Action) -> bool {
        match (&self.target_channel, &action.channel) {
            (None, _) => true,
            (Some(channel), Some(name)) => channel.is_named(name),
            (Some(_), None) => false,
        }
    }

    fn check_command(&self, action: &Action) -> bool {
        self.command
            .as_deref()
            .is_none_or(|command| normalize_command(command) == normalize_command(&action.command))
    }

    fn check_user(&self, action: &Action) -> bool {
        self.target_user
            .as_ref()
            .is_none_or(|user| user.is_named(&action.user))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = self
            .target_user
            .as_ref()
            .map_or_else(|| "everyone".to_string(), ToString::to_string);
        let channel = self
            .target_channel
            .as_ref()
            .map_or_else(|| "global".to_string(), ToString::to_string);
        let command = self.command.as_deref().unwrap_or("all");
        let expires = self
            .expires_on
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        write!(
            f,
            "#{}: user {user}, scope {channel}, command {command}, expires {expires}",
            self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rule(user: Option<&str>, channel: Option<&str>, command: Option<&str>) -> Rule {
        RuleDraft::new(
            user.map(|name| Identity::new(1, name)),
            channel.map(|name| Identity::new(2, name)),
            command.map(ToString::to_string),
            None,
        )
        .into_rule(1)
    }

    #[test]
    fn test_unset_fields_are_wildcards() {
        let r = rule(None, Some("foo"), None);
        assert!(r.applies_to(&Action::new("alice", Some("foo"), "ping")));
        assert!(r.applies_to(&Action::new("bob", Some("FOO"), "uptime")));
        assert!(!r.applies_to(&Action::new("alice", Some("bar"), "ping")));
        assert!(!r.applies_to(&Action::new("alice", None::<String>, "ping")));
    }

    #[test]
    fn test_set_fields_are_conjunctive() {
        let r = rule(Some("Bob"), None, Some("ban"));
        assert!(r.applies_to(&Action::new("bob", Some("foo"), "ban")));
        assert!(r.applies_to(&Action::new("BOB", None::<String>, "BAN  ")));
        assert!(!r.applies_to(&Action::new("bob", Some("foo"), "kick")));
        assert!(!r.applies_to(&Action::new("alice", Some("foo"), "ban")));
    }

    #[test]
    fn test_validation() {
        assert!(!rule(None, None, None).is_valid());
        assert!(rule(Some("bob"), None, None).is_valid());
        assert!(rule(None, Some("foo"), None).is_valid());
        assert!(rule(None, None, Some("ban")).is_valid());
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let now = Utc::now();
        let mut r = rule(Some("bob"), None, None);
        assert!(!r.is_expired_at(now));

        r.expires_on = Some(now);
        assert!(r.is_expired_at(now));

        r.expires_on = Some(now + Duration::seconds(5));
        assert!(!r.is_expired_at(now));
        assert!(r.is_expired_at(now + Duration::seconds(6)));
    }

    #[test]
    fn test_draft_normalizes_command() {
        let draft = RuleDraft::new(None, None, Some("Ban  ".to_string()), None);
        assert_eq!(draft.command.as_deref(), Some("ban"));
        assert!(draft.into_rule(3).is_active);
    }

    #[test]
    fn test_display() {
        let r = rule(Some("bob"), None, Some("ban"));
        assert_eq!(
            r.to_string(),
            "#1: user bob, scope global, command ban, expires never"
        );
    }
}
