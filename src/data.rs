use std::{ops::Deref, sync::Arc};

use crate::blacklist::{
    Action, ChannelCommandBlocklist, Identity, InterceptorChain, RuleAdmin, RuleEngine,
    SweeperHandle, Verdict,
};
use crate::config::BotConfig;
use dashmap::DashMap;

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("rules", &self.engine.len())
            .field("interceptors", &self.interceptors)
            .field("connected_channels", &self.connected_channels)
            .field("registered_commands", &self.registered_commands)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Create a new Data instance. The rule engine and the channel block list
    /// are chained, in that order, as the dispatch-time interceptors.
    #[must_use]
    pub fn new(
        config: BotConfig,
        engine: Arc<RuleEngine>,
        blocklist: Arc<ChannelCommandBlocklist>,
        sweeper: SweeperHandle,
        registered_commands: Vec<String>,
    ) -> Self {
        let interceptors = InterceptorChain::new()
            .with(engine.clone())
            .with(blocklist.clone());
        Self(Arc::new(DataInner {
            config,
            admin: RuleAdmin::new(Arc::clone(&engine)),
            engine,
            blocklist,
            interceptors,
            connected_channels: DashMap::new(),
            registered_commands,
            sweeper,
        }))
    }

    /// Record a channel the bot is now in
    pub fn connect_channel(&self, channel: &Identity) {
        self.connected_channels
            .insert(channel.id, channel.name.clone());
    }

    /// Forget a channel the bot left
    pub fn disconnect_channel(&self, channel_id: u64) {
        self.connected_channels.remove(&channel_id);
    }

    /// Name of a connected channel
    #[must_use]
    pub fn channel_name(&self, channel_id: u64) -> Option<String> {
        self.connected_channels
            .get(&channel_id)
            .map(|entry| entry.value().clone())
    }

    /// Names of every connected channel
    #[must_use]
    pub fn connected_channel_names(&self) -> Vec<String> {
        self.connected_channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Build the action for a command invocation. Channels the bot doesn't
    /// know about are treated like direct messages.
    #[must_use]
    pub fn action(&self, user: &str, channel_id: Option<u64>, command: &str) -> Action {
        let known = channel_id.and_then(|id| Some((id, self.channel_name(id)?)));
        match known {
            Some((id, name)) => Action::new(user, Some(name), command).with_channel_id(id),
            None => Action::new(user, None::<String>, command),
        }
    }

    /// Run the interceptor chain for an action
    #[must_use]
    pub fn is_allowed(&self, action: &Action) -> bool {
        self.interceptors.check(action) == Verdict::Allow
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    pub config: BotConfig,
    pub engine: Arc<RuleEngine>,
    pub admin: RuleAdmin,
    pub blocklist: Arc<ChannelCommandBlocklist>,
    pub interceptors: InterceptorChain,
    // Map of guild_id -> guild name, for every guild the bot is in
    pub connected_channels: DashMap<u64, String>,
    // Qualified names of every command registered with the framework
    pub registered_commands: Vec<String>,
    pub sweeper: SweeperHandle,
}

/// Tests for the data module
#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::{ExpirySweeper, RuleDraft, YamlRuleStore};
    use std::time::Duration;

    async fn data(dir: &tempfile::TempDir) -> Data {
        let store = YamlRuleStore::open(dir.path().join("blacklist.yaml"))
            .await
            .unwrap();
        let engine = Arc::new(RuleEngine::new(Arc::new(store)));
        let blocklist = Arc::new(ChannelCommandBlocklist::new(
            dir.path().join("command_blocklist.yaml"),
        ));
        let (sweeper, _task) =
            ExpirySweeper::new(Arc::clone(&engine), Duration::from_secs(30)).spawn();
        Data::new(
            BotConfig::default(),
            engine,
            blocklist,
            sweeper,
            vec!["ping".to_string(), "ban".to_string()],
        )
    }

    #[tokio::test]
    async fn test_connected_channels() {
        let dir = tempfile::tempdir().unwrap();
        let data = data(&dir).await;
        data.connect_channel(&Identity::new(10, "foo"));
        data.connect_channel(&Identity::new(11, "bar"));

        assert_eq!(data.channel_name(10).as_deref(), Some("foo"));
        let mut names = data.connected_channel_names();
        names.sort();
        assert_eq!(names, vec!["bar".to_string(), "foo".to_string()]);

        data.disconnect_channel(10);
        assert_eq!(data.channel_name(10), None);
        assert_eq!(data.action("alice", Some(10), "ping").channel, None);
        let action = data.action("alice", Some(11), "ping");
        assert_eq!(action.channel.as_deref(), Some("bar"));
        assert_eq!(action.channel_id, Some(11));
    }

    #[tokio::test]
    async fn test_chain_checks_rules_then_blocklist() {
        let dir = tempfile::tempdir().unwrap();
        let data = data(&dir).await;
        data.connect_channel(&Identity::new(10, "foo"));
        assert_eq!(data.interceptors.len(), 2);

        data.engine
            .create(RuleDraft::new(
                Some(Identity::new(1, "bob")),
                None,
                Some("ban".to_string()),
                None,
            ))
            .await
            .unwrap();
        data.blocklist
            .block(10, "ping", &data.registered_commands)
            .unwrap();

        assert!(!data.is_allowed(&data.action("bob", Some(10), "ban")));
        assert!(!data.is_allowed(&data.action("alice", Some(10), "ping")));
        assert!(data.is_allowed(&data.action("alice", Some(10), "ban")));
        assert!(data.is_allowed(&data.action("alice", None, "ping")));

        // A renamed guild keeps its block list
        data.connect_channel(&Identity::new(10, "foo-renamed"));
        assert!(!data.is_allowed(&data.action("alice", Some(10), "ping")));
    }

    #[tokio::test]
    async fn test_data_debug_impl() {
        let dir = tempfile::tempdir().unwrap();
        let debug_output = format!("{:?}", data(&dir).await);
        assert!(debug_output.contains("Data"));
        assert!(debug_output.contains("interceptors"));
        assert!(debug_output.contains("blacklist"));
        assert!(debug_output.contains("channel_blocklist"));
    }
}
