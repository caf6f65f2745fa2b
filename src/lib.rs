pub mod blacklist;
pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod logging;

pub const BOT_NAME: &str = "plonk_daemon";
pub const COMMAND_TARGET: &str = "plonk_daemon::command";
pub const ERROR_TARGET: &str = "plonk_daemon::error";
pub const EVENT_TARGET: &str = "plonk_daemon::handlers";
pub const BLACKLIST_TARGET: &str = "plonk_daemon::blacklist";
pub const CONSOLE_TARGET: &str = "plonk_daemon";

pub use config::BotConfig;
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
