//! Parsing of `plonk` requests
//!
//! A request is a list of `key:value` tokens separated by spaces, in any
//! order. Later duplicates overwrite earlier ones.
//!
//! ```text
//! plonk [scope:(channel[,channel...]|global)] user:(name|everyone) command:(name|all) [expires:(never|1d2h3m4s)]
//! ```

use crate::blacklist::{BlacklistError, BlacklistResult};
use chrono::Duration;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Usage line shown when `plonk` is called without arguments
pub const PLONK_USAGE: &str = "Manage blacklists. Usage: plonk [scope:(channel|global)] \
(user:(user|everyone)) (command:(command_name|all)) [expires:(never|timedelta)]";

/// Days are unbounded; hours, minutes and seconds take at most two digits below 60
static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(\d+)d(?:ays?)?)?(?:([0-5]?\d)h(?:ours?)?)?(?:([0-5]?\d)m(?:inutes?)?)?(?:([0-5]?\d)s(?:econds?)?)?$",
    )
    .unwrap_or_else(|e| panic!("invalid duration pattern: {e}"))
});

/// Channels a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    /// Lowercased channel names without a leading `#`
    Channels(Vec<String>),
}

/// Users a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserTarget {
    Everyone,
    /// Lowercased user name, resolved against known identities when applied
    Named(String),
}

/// Commands a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    All,
    /// Registered command name, in its registered spelling
    Named(String),
}

/// A validated `plonk` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlonkRequest {
    pub scope: Scope,
    pub user: UserTarget,
    pub command: CommandTarget,
    /// `None` never expires
    pub expires: Option<Duration>,
}

impl PlonkRequest {
    /// Parse request text against the set of registered command names
    ///
    /// # Errors
    /// Returns a [`BlacklistError`] naming the first offending token, or the
    /// first missing mandatory field (`command` before `user`).
    pub fn parse(text: &str, registered_commands: &[String]) -> BlacklistResult<Self> {
        let mut scope = Scope::Global;
        let mut user = None;
        let mut command = None;
        let mut expires = None;

        for token in text.split_whitespace() {
            let Some((key, value)) = token.split_once(':') else {
                return Err(BlacklistError::syntax(token, "no \":\" in option"));
            };
            match key.to_lowercase().as_str() {
                "scope" => scope = parse_scope(token, value)?,
                "user" => user = Some(parse_user(value)),
                "command" => command = Some(parse_command(value, registered_commands)?),
                "expires" => expires = parse_expires(value)?,
                _ => return Err(BlacklistError::syntax(token, "unknown option")),
            }
        }

        let command = command.ok_or(BlacklistError::MissingCommand)?;
        let user = user.ok_or(BlacklistError::MissingUser)?;
        if scope == Scope::Global && user == UserTarget::Everyone && command == CommandTarget::All
        {
            return Err(BlacklistError::Unrestricted);
        }

        Ok(Self {
            scope,
            user,
            command,
            expires,
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Channels(channels) => write!(f, "{}", channels.join(", ")),
        }
    }
}

impl fmt::Display for UserTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everyone => write!(f, "everyone"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

fn parse_scope(token: &str, value: &str) -> BlacklistResult<Scope> {
    if value.eq_ignore_ascii_case("global") {
        return Ok(Scope::Global);
    }
    let channels: Vec<String> = value
        .split(',')
        .map(|channel| channel.trim_start_matches('#').to_lowercase())
        .filter(|channel| !channel.is_empty())
        .collect();
    if channels.is_empty() {
        return Err(BlacklistError::syntax(token, "empty scope"));
    }
    Ok(Scope::Channels(channels))
}

fn parse_user(value: &str) -> UserTarget {
    if value.eq_ignore_ascii_case("everyone") {
        UserTarget::Everyone
    } else {
        UserTarget::Named(value.to_lowercase())
    }
}

fn parse_command(value: &str, registered_commands: &[String]) -> BlacklistResult<CommandTarget> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(CommandTarget::All);
    }
    registered_commands
        .iter()
        .find(|command| command.eq_ignore_ascii_case(value))
        .map(|command| CommandTarget::Named(command.clone()))
        .ok_or_else(|| BlacklistError::UnknownCommand(value.to_string()))
}

fn parse_expires(value: &str) -> BlacklistResult<Option<Duration>> {
    if value.eq_ignore_ascii_case("never") {
        return Ok(None);
    }
    parse_duration(value).map(Some)
}

/// Parse a `1d2h3m4s`-style duration; every component is optional but at
/// least one must be present
///
/// # Errors
/// Returns [`BlacklistError::InvalidDuration`] on malformed or overflowing input.
pub fn parse_duration(value: &str) -> BlacklistResult<Duration> {
    let invalid = || BlacklistError::InvalidDuration(value.to_string());
    let captures = DURATION_REGEX.captures(value).ok_or_else(invalid)?;
    if captures.iter().skip(1).all(|group| group.is_none()) {
        return Err(invalid());
    }

    let component = |index: usize| -> BlacklistResult<i64> {
        captures
            .get(index)
            .map_or(Ok(0), |group| group.as_str().parse::<i64>())
            .map_err(|_| invalid())
    };

    let parts = [
        Duration::try_days(component(1)?),
        Duration::try_hours(component(2)?),
        Duration::try_minutes(component(3)?),
        Duration::try_seconds(component(4)?),
    ];
    parts.into_iter().try_fold(Duration::zero(), |total, part| {
        part.and_then(|part| total.checked_add(&part))
            .ok_or_else(invalid)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> Vec<String> {
        vec!["ban".to_string(), "Uptime".to_string(), "ping".to_string()]
    }

    #[test]
    fn test_parse_full_request() {
        let request = PlonkRequest::parse(
            "scope:#Foo,bar user:Bob command:uptime expires:1d2h",
            &commands(),
        )
        .unwrap();
        assert_eq!(
            request,
            PlonkRequest {
                scope: Scope::Channels(vec!["foo".to_string(), "bar".to_string()]),
                user: UserTarget::Named("bob".to_string()),
                command: CommandTarget::Named("Uptime".to_string()),
                expires: Some(Duration::hours(26)),
            }
        );
    }

    #[test]
    fn test_defaults_and_overwrites() {
        let request =
            PlonkRequest::parse("user:bob command:all user:everyone command:ban", &commands())
                .unwrap();
        assert_eq!(request.scope, Scope::Global);
        assert_eq!(request.user, UserTarget::Everyone);
        assert_eq!(request.command, CommandTarget::Named("ban".to_string()));
        assert_eq!(request.expires, None);
    }

    #[test]
    fn test_missing_user_is_rejected() {
        let err = PlonkRequest::parse("scope:global command:all", &commands()).unwrap_err();
        assert!(matches!(err, BlacklistError::MissingUser));
        assert_eq!(err.to_string(), "No user provided");
    }

    #[test]
    fn test_missing_command_reported_first() {
        let err = PlonkRequest::parse("scope:global", &commands()).unwrap_err();
        assert!(matches!(err, BlacklistError::MissingCommand));
    }

    #[test]
    fn test_syntax_errors_name_the_token() {
        let err = PlonkRequest::parse("user:bob bogus", &commands()).unwrap_err();
        assert!(matches!(err, BlacklistError::Syntax { ref token, .. } if token == "bogus"));

        let err = PlonkRequest::parse("user:bob colour:red command:ban", &commands()).unwrap_err();
        assert!(matches!(err, BlacklistError::Syntax { ref token, .. } if token == "colour:red"));
    }

    #[test]
    fn test_empty_scope_is_rejected() {
        for (text, bad) in [
            ("scope:, user:bob command:ban", "scope:,"),
            ("scope:# user:everyone command:all", "scope:#"),
            ("scope: user:bob command:ban", "scope:"),
        ] {
            let err = PlonkRequest::parse(text, &commands()).unwrap_err();
            assert!(
                matches!(err, BlacklistError::Syntax { ref token, .. } if token == bad),
                "{text} gave {err}"
            );
        }
    }

    #[test]
    fn test_unknown_command() {
        let err = PlonkRequest::parse("user:bob command:nuke", &commands()).unwrap_err();
        assert!(matches!(err, BlacklistError::UnknownCommand(ref name) if name == "nuke"));
    }

    #[test]
    fn test_unrestricted_request_is_rejected() {
        let err =
            PlonkRequest::parse("scope:global user:everyone command:all", &commands()).unwrap_err();
        assert!(matches!(err, BlacklistError::Unrestricted));

        assert!(PlonkRequest::parse("scope:foo user:everyone command:all", &commands()).is_ok());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::seconds(5));
        assert_eq!(parse_duration("90d").unwrap(), Duration::days(90));
        assert_eq!(
            parse_duration("1days2hours3minutes4seconds").unwrap(),
            Duration::seconds(86_400 + 7_200 + 180 + 4)
        );
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("60m").is_err());
        assert!(parse_duration("2h1d").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("99999999999999999999d").is_err());
    }

    #[test]
    fn test_expires_never() {
        let request =
            PlonkRequest::parse("user:bob command:ban expires:1h expires:never", &commands())
                .unwrap();
        assert_eq!(request.expires, None);
    }
}
