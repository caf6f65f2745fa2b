use crate::blacklist::{Operator, PLONK_USAGE, PlonkRequest, Rule, RuleId};
use crate::{BLACKLIST_TARGET, Context, Data, Error};
use poise::command;
use tracing::warn;

/// Discord rejects messages longer than this
const MESSAGE_LIMIT: usize = 2000;

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        ping(),
        plonk(),
        unplonk(),
        plonks(),
        reload_blacklist(),
        blacklist_command(),
        unblacklist_command(),
        list_blacklisted_commands(),
    ]
}

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Blacklist a user, a channel, a command or a combination of them
///
/// plonk [scope:(channel|global)] user:(name|everyone) command:(name|all) [expires:(never|1d2h3m4s)]
///
/// Only bot owners may use global scope or name other servers.
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn plonk(
    ctx: Context<'_>,
    #[rest]
    #[description = "key:value pairs: scope, user, command, expires"]
    request: Option<String>,
) -> Result<(), Error> {
    let Some(text) = request.filter(|text| !text.trim().is_empty()) else {
        ctx.say(PLONK_USAGE).await?;
        return Ok(());
    };

    let data = ctx.data();
    let request = match PlonkRequest::parse(&text, &data.registered_commands) {
        Ok(request) => request,
        Err(e) => {
            warn!(
                target: BLACKLIST_TARGET,
                error = %e,
                request = %text,
                event = "rejected",
                "Malformed blacklist request"
            );
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    match data
        .admin
        .apply(&request, &operator(ctx), &data.connected_channel_names())
        .await
    {
        Ok(rules) => {
            for reply in chunk_lines(&plonked_lines(&rules), MESSAGE_LIMIT) {
                ctx.say(reply).await?;
            }
        }
        Err(e) => {
            ctx.say(e.to_string()).await?;
        }
    }
    Ok(())
}

/// Remove a blacklist rule by id
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn unplonk(
    ctx: Context<'_>,
    #[description = "Id of the rule, as shown by plonks"] rule_id: RuleId,
) -> Result<(), Error> {
    let reply = match ctx.data().admin.remove(rule_id, &operator(ctx)).await {
        Ok(Some(rule)) => format!("Removed {rule}"),
        Ok(None) => format!("Removed rule #{rule_id}"),
        Err(e) => e.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// List the active blacklist rules you can manage
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn plonks(ctx: Context<'_>) -> Result<(), Error> {
    let rules = ctx.data().admin.visible_rules(&operator(ctx));
    if rules.is_empty() {
        ctx.say("No active blacklist rules").await?;
        return Ok(());
    }
    let lines: Vec<String> = rules.iter().map(ToString::to_string).collect();
    for reply in chunk_lines(&lines, MESSAGE_LIMIT) {
        ctx.say(reply).await?;
    }
    Ok(())
}

/// Reload blacklist rules from storage
#[command(prefix_command, slash_command, owners_only)]
pub async fn reload_blacklist(ctx: Context<'_>) -> Result<(), Error> {
    let count = ctx.data().engine.reload().await?;
    ctx.data().sweeper.sweep_now().await;
    ctx.say(format!("Reloaded {count} blacklist rule(s)")).await?;
    Ok(())
}

/// Blacklist a command in this channel
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn blacklist_command(
    ctx: Context<'_>,
    #[description = "Command to block here"] command: String,
) -> Result<(), Error> {
    let data = ctx.data();
    let Some((channel_id, channel)) = current_channel(ctx) else {
        ctx.say("This channel isn't connected yet").await?;
        return Ok(());
    };

    let reply = match data
        .blocklist
        .block(channel_id, &command, &data.registered_commands)
    {
        Ok(()) => {
            data.blocklist.save().await?;
            format!("Blacklisted command {command} in {channel}")
        }
        Err(e) => e.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Remove a command from this channel's blacklist
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn unblacklist_command(
    ctx: Context<'_>,
    #[description = "Command to unblock here"] command: String,
) -> Result<(), Error> {
    let data = ctx.data();
    let Some((channel_id, channel)) = current_channel(ctx) else {
        ctx.say("This channel isn't connected yet").await?;
        return Ok(());
    };

    let reply = match data.blocklist.unblock(channel_id, &command) {
        Ok(()) => {
            data.blocklist.save().await?;
            format!("Unblacklisted command {command} in {channel}")
        }
        Err(e) => e.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// List the commands blacklisted in this channel
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn list_blacklisted_commands(ctx: Context<'_>) -> Result<(), Error> {
    let Some((channel_id, channel)) = current_channel(ctx) else {
        ctx.say("This channel isn't connected yet").await?;
        return Ok(());
    };

    let blocked = ctx.data().blocklist.list(channel_id);
    let reply = if blocked.is_empty() {
        format!("No commands are blacklisted in {channel}")
    } else {
        format!("Blacklisted commands in {channel}: {}", blocked.join(", "))
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Id and name of the connected channel the command was sent from
fn current_channel(ctx: Context<'_>) -> Option<(u64, String)> {
    let channel_id = ctx.guild_id()?.get();
    Some((channel_id, ctx.data().channel_name(channel_id)?))
}

fn operator(ctx: Context<'_>) -> Operator {
    if ctx.framework().options().owners.contains(&ctx.author().id) {
        return Operator::owner();
    }
    Operator::moderator(current_channel(ctx).map(|(_, name)| name))
}

fn plonked_lines(rules: &[Rule]) -> Vec<String> {
    rules.iter().map(|rule| format!("Plonked {rule}")).collect()
}

/// Join lines into messages no longer than `limit`. A single line over the
/// limit is cut at a char boundary.
fn chunk_lines(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in lines {
        let line = truncate(line, limit);
        if !current.is_empty() && current.len() + 1 + line.len() > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn truncate(line: &str, limit: usize) -> &str {
    if line.len() <= limit {
        return line;
    }
    let mut end = limit;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::{EXEMPT_COMMANDS, Identity};

    #[test]
    fn test_ping_command_definition() {
        let cmd = ping();
        assert_eq!(cmd.name, "ping");
        assert!(
            cmd.description
                .unwrap_or_default()
                .contains("check if the bot is responsive")
        );
        assert!(cmd.guild_only);
    }

    #[test]
    fn test_management_commands_require_permissions() {
        for cmd in [
            plonk(),
            unplonk(),
            plonks(),
            blacklist_command(),
            unblacklist_command(),
            list_blacklisted_commands(),
        ] {
            assert!(cmd.guild_only, "{} should be guild only", cmd.name);
            assert!(
                cmd.required_permissions
                    .contains(poise::serenity_prelude::Permissions::MANAGE_GUILD),
                "{} should require MANAGE_GUILD",
                cmd.name
            );
        }
        assert!(reload_blacklist().owners_only);
    }

    #[test]
    fn test_all_registers_exempt_commands() {
        let names: Vec<String> = all().into_iter().map(|cmd| cmd.name).collect();
        for exempt in EXEMPT_COMMANDS {
            assert!(names.iter().any(|name| name == exempt), "missing {exempt}");
        }
        assert!(names.iter().any(|name| name == "plonk"));
    }

    #[test]
    fn test_plonked_lines() {
        let rule = crate::blacklist::RuleDraft::new(
            Some(Identity::new(1, "bob")),
            None,
            Some("ban".to_string()),
            None,
        )
        .into_rule(3);
        let lines = plonked_lines(&[rule]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Plonked #3"));
    }

    #[test]
    fn test_chunk_lines() {
        let lines: Vec<String> = ["aaaa", "bbbb", "cc"].into_iter().map(String::from).collect();
        assert_eq!(chunk_lines(&lines, 9), vec!["aaaa\nbbbb", "cc"]);
        assert_eq!(chunk_lines(&lines, 100), vec!["aaaa\nbbbb\ncc"]);
        assert!(chunk_lines(&[], 10).is_empty());
    }

    #[test]
    fn test_chunk_lines_truncates_long_lines() {
        let lines = vec!["ééééé".to_string()];
        let chunks = chunk_lines(&lines, 5);
        assert_eq!(chunks, vec!["éé"]);
    }
}
