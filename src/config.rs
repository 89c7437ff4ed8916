use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    pub rdm: RdmConfig,
    #[serde(default)]
    pub locale: LocaleConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub groups: GroupsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token the chat gateway must present on inbound calls.
    pub api_key: Option<String>,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_true")]
    pub hide_bot_message: bool,
    /// How long an open menu waits for the operator before it is dropped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Used when RUST_LOG is unset.
    pub log_filter: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key: None,
            gateway_url: default_gateway_url(),
            hide_bot_message: true,
            idle_timeout_secs: default_idle_timeout_secs(),
            log_filter: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3100".to_string()
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:3200".to_string()
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize)]
pub struct RdmConfig {
    pub api_endpoint: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocaleConfig {
    #[serde(default = "default_timezone", deserialize_with = "deserialize_tz")]
    pub timezone: Tz,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            date_format: default_date_format(),
            time_format: default_time_format(),
        }
    }
}

impl LocaleConfig {
    pub fn datetime_format(&self) -> String {
        format!("{} {}", self.date_format, self.time_format)
    }
}

fn default_timezone() -> Tz {
    chrono_tz::UTC
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|e| serde::de::Error::custom(format!("invalid timezone '{name}': {e}")))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    pub tech_channel: Option<String>,
    pub user_channel: Option<String>,
}

/// Assignment groups that only ever take one kind of action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupsConfig {
    #[serde(default)]
    pub iv_only: Vec<String>,
    #[serde(default)]
    pub quest_only: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    #[serde(default = "default_min_hour")]
    pub min_hour: u32,
    #[serde(default = "default_max_hour")]
    pub max_hour: u32,
    #[serde(default = "default_min_lead_time_minutes")]
    pub min_lead_time_minutes: i64,
    #[serde(default = "default_execution_offset_minutes")]
    pub execution_offset_minutes: i64,
    #[serde(default)]
    pub quest_instances: Vec<String>,
    #[serde(default)]
    pub iv_instances: Vec<String>,
    #[serde(default = "default_refresh_cron")]
    pub refresh_cron: String,
    #[serde(default = "default_past_events_path")]
    pub past_events_path: PathBuf,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            feed_url: default_feed_url(),
            allowed_types: default_allowed_types(),
            min_hour: default_min_hour(),
            max_hour: default_max_hour(),
            min_lead_time_minutes: default_min_lead_time_minutes(),
            execution_offset_minutes: default_execution_offset_minutes(),
            quest_instances: Vec::new(),
            iv_instances: Vec::new(),
            refresh_cron: default_refresh_cron(),
            past_events_path: default_past_events_path(),
        }
    }
}

fn default_feed_url() -> String {
    "https://raw.githubusercontent.com/bigfoott/ScrapedDuck/data/events.min.json".to_string()
}

fn default_allowed_types() -> Vec<String> {
    ["community-day", "event", "spotlight-hour", "pokemon-spotlight-hour"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_min_hour() -> u32 {
    9
}

fn default_max_hour() -> u32 {
    18
}

fn default_min_lead_time_minutes() -> i64 {
    30
}

fn default_execution_offset_minutes() -> i64 {
    10
}

fn default_refresh_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_past_events_path() -> PathBuf {
    default_base_dir().join("past_events.json")
}

/// Templates use `{name}` placeholders, see `messages::render`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_tech_success")]
    pub tech_success: String,
    #[serde(default = "default_tech_fail")]
    pub tech_fail: String,
    #[serde(default = "default_user_request")]
    pub user_request: String,
    #[serde(default = "default_user_start")]
    pub user_start: String,
    #[serde(default = "default_event_tech")]
    pub event_tech: String,
    #[serde(default = "default_event_user")]
    pub event_user: String,
    #[serde(default = "default_event_filtered")]
    pub event_filtered: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            tech_success: default_tech_success(),
            tech_fail: default_tech_fail(),
            user_request: default_user_request(),
            user_start: default_user_start(),
            event_tech: default_event_tech(),
            event_user: default_event_user(),
            event_filtered: default_event_filtered(),
        }
    }
}

fn default_tech_success() -> String {
    "{type} **{action}** succeeded for: {assignments_groups}".to_string()
}

fn default_tech_fail() -> String {
    "{type} **{action}** FAILED for: {assignments_groups}".to_string()
}

fn default_user_request() -> String {
    "Quests are being rescanned: {assignments_groups}".to_string()
}

fn default_user_start() -> String {
    "Scanning started: {assignments_groups}".to_string()
}

fn default_event_tech() -> String {
    "Scheduled rescan for **{name}** ({boundary}) at {date}".to_string()
}

fn default_event_user() -> String {
    "Quests will be rescanned for **{name}** ({boundary}) at {date}".to_string()
}

fn default_event_filtered() -> String {
    "Skipped **{name}** ({boundary}) at {date}: {reason}".to_string()
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rdmbot")
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse(&content)
}

fn parse(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
    if let Some(expanded) = config.events.past_events_path.to_str().map(expand_tilde) {
        config.events.past_events_path = expanded;
    }
    if config.events.min_hour > config.events.max_hour || config.events.max_hour > 23 {
        anyhow::bail!(
            "Invalid [events] hour window: {}..={}",
            config.events.min_hour,
            config.events.max_hour
        );
    }
    Ok(config)
}

pub async fn init_config_dir() -> Result<PathBuf> {
    let base = default_base_dir();
    tokio::fs::create_dir_all(&base).await?;

    let config_path = base.join("config.toml");
    if !config_path.exists() {
        tokio::fs::write(
            &config_path,
            r#"[bot]
bind = "127.0.0.1:3100"
gateway_url = "http://127.0.0.1:3200"
# api_key = "shared-secret-with-gateway"
hide_bot_message = true
idle_timeout_secs = 900

[rdm]
api_endpoint = "http://rdm.local:9000"
username = "admin"
password = "CHANGE_ME"

[locale]
timezone = "Europe/Warsaw"
date_format = "%Y-%m-%d"
time_format = "%H:%M"

[channels]
# tech_channel = "123456789"
# user_channel = "987654321"

[groups]
iv_only = []
quest_only = []

[events]
enabled = false
allowed_types = ["community-day", "event", "spotlight-hour"]
min_hour = 9
max_hour = 18
min_lead_time_minutes = 30
execution_offset_minutes = 10
quest_instances = []
iv_instances = []
# sec min hour day month weekday
refresh_cron = "0 0 * * * *"
"#,
        )
        .await?;
    }

    Ok(config_path)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    parse(
        r#"
[rdm]
api_endpoint = "http://rdm.test"
username = "u"
password = "p"

[locale]
timezone = "Europe/Warsaw"

[events]
enabled = true
feed_url = "http://feed.test/events.json"
allowed_types = ["community"]
quest_instances = ["Quests A", "Quests B"]
iv_instances = ["IV Main"]
"#,
    )
    .expect("test config parses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg = parse(
            r#"
[rdm]
api_endpoint = "http://rdm.local"
username = "admin"
password = "secret"
"#,
        )
        .unwrap();
        assert_eq!(cfg.bot.bind, "127.0.0.1:3100");
        assert!(cfg.bot.hide_bot_message);
        assert_eq!(cfg.locale.timezone, chrono_tz::UTC);
        assert_eq!(cfg.locale.datetime_format(), "%Y-%m-%d %H:%M");
        assert!(!cfg.events.enabled);
        assert_eq!((cfg.events.min_hour, cfg.events.max_hour), (9, 18));
        assert!(cfg.messages.tech_fail.contains("{assignments_groups}"));
    }

    #[test]
    fn test_timezone_is_validated() {
        let err = parse(
            r#"
[rdm]
api_endpoint = "x"
username = "u"
password = "p"

[locale]
timezone = "Mars/Olympus"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("Mars/Olympus"));
    }

    #[test]
    fn test_inverted_hour_window_rejected() {
        let err = parse(
            r#"
[rdm]
api_endpoint = "x"
username = "u"
password = "p"

[events]
min_hour = 20
max_hour = 8
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_past_events_path_expands_tilde() {
        let cfg = parse(
            r#"
[rdm]
api_endpoint = "x"
username = "u"
password = "p"

[events]
past_events_path = "~/.rdmbot/past.json"
"#,
        )
        .unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(cfg.events.past_events_path, home.join(".rdmbot/past.json"));
        }
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/etc/rdmbot.toml"), PathBuf::from("/etc/rdmbot.toml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/x.toml"), home.join("x.toml"));
        }
    }
}
