use crate::blacklist::Identity;
use crate::{Data, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildId, Message, PartialGuild, Ready,
    UnavailableGuild,
};
use tracing::{debug, info, warn};

/// Gateway event handler. Keeps the connected channel table and the
/// identity table current so plonk requests can name users and channels.
pub struct Handler {
    data: Data,
}

impl Handler {
    #[must_use]
    pub fn new(data: Data) -> Self {
        Self { data }
    }

    /// Record an identity; a rename also updates the rules that target it
    async fn remember(&self, identity: Identity) {
        if let Err(e) = self.data.engine.remember_identity(identity.clone()).await {
            warn!(
                target: EVENT_TARGET,
                id = identity.id,
                name = %identity.name,
                error = %e,
                "Failed to remember identity"
            );
        }
    }
}

/// Identity to record for a message author. Bots never issue commands, so
/// they're left out.
fn author_identity(id: u64, name: &str, bot: bool) -> Option<Identity> {
    (!bot).then(|| Identity::new(id, name))
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let channel = Identity::new(guild.id.get(), guild.name.clone());
        self.data.connect_channel(&channel);
        info!(
            target: EVENT_TARGET,
            guild_id = channel.id,
            name = %channel.name,
            event = "channel_connected",
            "Joined channel {}",
            channel.name
        );
        self.remember(channel).await;
    }

    async fn guild_update(
        &self,
        _ctx: Context,
        _old_data_if_available: Option<Guild>,
        new_data: PartialGuild,
    ) {
        let channel = Identity::new(new_data.id.get(), new_data.name.clone());
        self.data.connect_channel(&channel);
        self.remember(channel).await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An unavailable guild is an outage, not a departure
        if incomplete.unavailable {
            debug!(target: EVENT_TARGET, guild_id = incomplete.id.get(), "Guild unavailable");
            return;
        }
        self.data.disconnect_channel(incomplete.id.get());
        info!(
            target: EVENT_TARGET,
            guild_id = incomplete.id.get(),
            event = "channel_disconnected",
            "Left channel"
        );
    }

    async fn message(&self, _ctx: Context, new_message: Message) {
        let author = &new_message.author;
        if let Some(identity) = author_identity(author.id.get(), &author.name, author.bot) {
            self.remember(identity).await;
        }
    }
}

/// Framework-wide command check. Runs the interceptor chain for the
/// invocation; a denied command is dropped without a reply.
#[must_use]
pub fn allow_command(ctx: crate::Context<'_>) -> bool {
    let data = ctx.data();
    let action = data.action(
        &ctx.author().name,
        ctx.guild_id().map(GuildId::get),
        &ctx.command().qualified_name,
    );
    data.is_allowed(&action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_author_identity_skips_bots() {
        assert_eq!(
            author_identity(7, "bob", false),
            Some(Identity::new(7, "bob"))
        );
        assert_eq!(author_identity(8, "helper", true), None);
    }
}
