use std::env;
use std::sync::Arc;

use plonk_daemon::blacklist::{ChannelCommandBlocklist, ExpirySweeper, RuleEngine, YamlRuleStore};
use plonk_daemon::{BOT_NAME, BotConfig, Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let config = BotConfig::load().await?;
    logging::init(&config.log_dir)?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    // Rules and identities
    let store = YamlRuleStore::open(&config.rules_file).await?;
    info!("Opened blacklist store at {}", store.path().display());
    let engine = Arc::new(RuleEngine::new(Arc::new(store)));
    engine.reload().await?;

    let blocklist = Arc::new(ChannelCommandBlocklist::load(&config.command_blocklist_file).await?);

    let (sweeper, sweeper_task) =
        ExpirySweeper::new(Arc::clone(&engine), config.sweep_interval()).spawn();

    let commands = commands::all();
    let registered_commands = commands
        .iter()
        .map(|command| command.qualified_name.clone())
        .collect();
    let prefix = config.command_prefix.clone();
    let data = Data::new(config, engine, blocklist, sweeper.clone(), registered_commands);

    let framework_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands,
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            command_check: Some(|ctx| Box::pin(async move { Ok(handlers::allow_command(ctx)) })),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console(format!("{BOT_NAME}: registering commands"));
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(framework_data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler::new(data))
        .framework(framework)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting {BOT_NAME}...");
    if let Err(err) = client.start().await {
        error!("Error running the bot: {err}");
    }

    sweeper.shutdown().await;
    if let Err(err) = sweeper_task.await {
        error!("Sweeper task failed: {err}");
    }
    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
    }
}
