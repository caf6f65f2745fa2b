//! Per-channel command block list
//!
//! A coarser companion to the rule engine: channel operators can switch
//! individual commands off in their channel. The commands that manage the
//! list can never be blocked by it.

use crate::BLACKLIST_TARGET;
use crate::blacklist::{
    Action, BlacklistError, BlacklistResult, CommandInterceptor, StoreResult, Verdict,
};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// Commands exempt from the block list
pub const EXEMPT_COMMANDS: [&str; 3] = [
    "blacklist_command",
    "unblacklist_command",
    "list_blacklisted_commands",
];

/// Map of channel id -> blocked command names, persisted as YAML
#[derive(Debug)]
pub struct ChannelCommandBlocklist {
    path: PathBuf,
    entries: DashMap<u64, Vec<String>>,
}

impl ChannelCommandBlocklist {
    /// Create an empty block list that saves to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: DashMap::new(),
        }
    }

    /// Load the block list from `path`, starting empty if the file doesn't exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let blocklist = Self::new(path);
        match tokio::fs::read_to_string(&blocklist.path).await {
            Ok(content) => {
                let channels: BTreeMap<u64, Vec<String>> = serde_yaml::from_str(&content)?;
                for (channel, commands) in channels {
                    blocklist.entries.insert(channel, commands);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(blocklist)
    }

    /// Save the block list to its file
    ///
    /// # Errors
    /// Returns an error if the file cannot be serialized or written.
    pub async fn save(&self) -> StoreResult<()> {
        let channels: BTreeMap<u64, Vec<String>> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        let yaml = serde_yaml::to_string(&channels)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, yaml).await?;
        Ok(())
    }

    /// Block `command` in `channel`. `command` must be one of `registered_commands`.
    ///
    /// # Errors
    /// Fails if the command doesn't exist or is already blocked in the channel.
    pub fn block(
        &self,
        channel_id: u64,
        command: &str,
        registered_commands: &[String],
    ) -> BlacklistResult<()> {
        let command = registered_commands
            .iter()
            .find(|known| known.as_str() == command)
            .ok_or_else(|| BlacklistError::UnknownCommand(command.to_string()))?;

        let mut blocked = self.entries.entry(channel_id).or_default();
        if blocked.contains(command) {
            return Err(BlacklistError::AlreadyBlocked(command.clone()));
        }
        blocked.push(command.clone());
        Ok(())
    }

    /// Unblock `command` in `channel`
    ///
    /// # Errors
    /// Fails if the command isn't blocked in the channel.
    pub fn unblock(&self, channel_id: u64, command: &str) -> BlacklistResult<()> {
        let mut blocked = self
            .entries
            .get_mut(&channel_id)
            .ok_or_else(|| BlacklistError::NotBlocked(command.to_string()))?;
        let position = blocked
            .iter()
            .position(|known| known == command)
            .ok_or_else(|| BlacklistError::NotBlocked(command.to_string()))?;
        blocked.remove(position);
        Ok(())
    }

    /// Commands blocked in `channel`
    #[must_use]
    pub fn list(&self, channel_id: u64) -> Vec<String> {
        self.entries
            .get(&channel_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_blocked(&self, channel_id: u64, command: &str) -> bool {
        if EXEMPT_COMMANDS.contains(&command) {
            return false;
        }
        self.entries
            .get(&channel_id)
            .is_some_and(|blocked| blocked.iter().any(|known| known == command))
    }
}

impl CommandInterceptor for ChannelCommandBlocklist {
    fn name(&self) -> &'static str {
        "channel_blocklist"
    }

    fn intercept(&self, action: &Action) -> Verdict {
        let Some(channel_id) = action.channel_id else {
            return Verdict::Allow;
        };
        if !self.is_blocked(channel_id, &action.command) {
            return Verdict::Allow;
        }

        let channel = action.channel.as_deref().unwrap_or("unknown");
        info!(
            target: BLACKLIST_TARGET,
            user = %action.user,
            channel = %channel,
            channel_id = channel_id,
            command = %action.command,
            event = "denied",
            "User {} attempted to call command {} in channel {} where it is blacklisted",
            action.user,
            action.command,
            channel
        );
        Verdict::Deny
    }
}
