use std::time::Duration;

use thiserror::Error;

use typerace_core::{DnfXpPolicy, PromptPool, RaceRules};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: expected a number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("TYPERACE_DNF_XP: expected \"none\" or \"partial\", got {0:?}")]
    InvalidDnfPolicy(String),
    #[error("failed to read prompts file {path}: {source}")]
    PromptsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Timing and policy for every room this server hosts.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub rules: RaceRules,
    /// Time between countdown ticks.
    pub tick_interval: Duration,
    /// Overall race timeout; `None` waits for every racer.
    pub race_timeout: Option<Duration>,
    /// Hold on the results before the room resets to Waiting.
    pub settle_delay: Duration,
    /// `None` treats a disconnect as a leave.
    pub disconnect_grace: Option<Duration>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            rules: RaceRules::default(),
            tick_interval: Duration::from_secs(1),
            race_timeout: Some(Duration::from_secs(300)),
            settle_delay: Duration::from_secs(5),
            disconnect_grace: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub webhook_url: Option<String>,
    pub max_connections: u32,
    pub max_messages_per_sec: u32,
    pub room: RoomConfig,
    pub prompts: PromptPool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite:typerace.db?mode=rwc".to_string(),
            webhook_url: None,
            max_connections: 500,
            max_messages_per_sec: 30,
            room: RoomConfig::default(),
            prompts: PromptPool::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ServerConfig::default();
        let default_rules = RaceRules::default();

        let dnf_xp = match read_string("TYPERACE_DNF_XP") {
            Some(raw) => DnfXpPolicy::parse(&raw).ok_or(ConfigError::InvalidDnfPolicy(raw))?,
            None => default_rules.dnf_xp,
        };

        let rules = RaceRules {
            min_players_to_start: read_number(
                "TYPERACE_MIN_PLAYERS",
                default_rules.min_players_to_start,
            )?,
            max_players: read_number("TYPERACE_MAX_PLAYERS", default_rules.max_players)?,
            countdown_ticks: read_number("TYPERACE_COUNTDOWN_TICKS", default_rules.countdown_ticks)?,
            dnf_xp,
        }
        .normalized();

        let room = RoomConfig {
            rules,
            tick_interval: Duration::from_millis(read_number("TYPERACE_TICK_MS", 1_000)?),
            race_timeout: optional_ms(read_number("TYPERACE_RACE_TIMEOUT_MS", 300_000)?),
            settle_delay: Duration::from_millis(read_number("TYPERACE_SETTLE_MS", 5_000)?),
            disconnect_grace: optional_ms(read_number("TYPERACE_DISCONNECT_GRACE_MS", 0)?),
        };

        let prompts = match read_string("TYPERACE_PROMPTS_FILE") {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::PromptsFile { path, source })?;
                PromptPool::from_lines(&text)
            }
            None => defaults.prompts,
        };

        Ok(Self {
            port: read_number("PORT", defaults.port)?,
            database_url: read_string("DATABASE_URL").unwrap_or(defaults.database_url),
            webhook_url: read_string("TYPERACE_WEBHOOK_URL"),
            max_connections: read_number("TYPERACE_MAX_CONNECTIONS", defaults.max_connections)?,
            max_messages_per_sec: read_number(
                "TYPERACE_MAX_MESSAGES_PER_SEC",
                defaults.max_messages_per_sec,
            )?,
            room,
            prompts,
        })
    }
}

fn read_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn read_number<T: std::str::FromStr>(key: &'static str, fallback: T) -> Result<T, ConfigError> {
    match read_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(fallback),
    }
}

/// Zero disables the timer.
fn optional_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
