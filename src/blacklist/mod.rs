//! Blacklist system for Plonk Daemon
//!
//! Deny-rules scoped to a user, a channel, a command or any combination,
//! optionally time-limited, checked on every command dispatch.

mod admin;
mod channel_blocklist;
mod collector;
mod engine;
mod error;
mod intercept;
mod request;
mod rule;
mod store;
mod sweeper;

pub use admin::{Operator, RuleAdmin};
pub use channel_blocklist::{ChannelCommandBlocklist, EXEMPT_COMMANDS};
pub use collector::ExpiryCollector;
pub use engine::{RuleEngine, SweepReport};
pub use error::{BlacklistError, BlacklistResult, StoreError, StoreResult};
pub use intercept::{CommandInterceptor, InterceptorChain, Verdict};
pub use request::{CommandTarget, PLONK_USAGE, PlonkRequest, Scope, UserTarget, parse_duration};
pub use rule::{Action, Identity, Rule, RuleDraft, RuleId, normalize_command};
#[cfg(test)]
pub use store::MockRuleStore;
pub use store::{RuleStore, YamlRuleStore};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL_SECS, ExpirySweeper, SweepRequest, SweeperHandle};
