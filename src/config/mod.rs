//! Configuration module for Anjani.
//!
//! Loads configuration from environment variables. Parsing goes through a
//! lookup function so tests do not touch the process environment.

use std::net::{IpAddr, SocketAddr};

use teloxide::types::ChatId;
use thiserror::Error;
use url::Url;

use crate::dispatch::{AlertTarget, DispatcherConfig};

/// Bot running mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BotMode {
    #[default]
    Polling,
    Webhook,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub bot_mode: BotMode,
    pub webhook_url: Option<Url>,
    pub webhook_port: u16,
    pub webhook_secret: Option<String>,

    /// Owner user IDs (comma-separated).
    /// These users pass every admin check.
    pub owner_ids: Vec<u64>,

    /// Chat receiving startup and shutdown notices.
    pub log_channel: Option<ChatId>,

    // Alerting
    pub alert_log: Option<AlertTarget>,
    pub alert_api: Option<Url>,
    pub alert_user: Option<String>,
    pub alert_pass: Option<String>,

    /// Raw `;`-separated flags, e.g. `disable_message_stats_plugin`.
    pub plugin_flags: Vec<String>,

    // Metrics server
    pub webserver_host: IpAddr,
    pub webserver_port: u16,
}

impl Config {
    /// Load configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `lookup`, which returns the raw value of
    /// a key. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token = get("BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let bot_mode = match get("BOT_MODE").map(|m| m.to_lowercase()).as_deref() {
            None | Some("polling") => BotMode::Polling,
            Some("webhook") => BotMode::Webhook,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BOT_MODE",
                    reason: format!("expected polling or webhook, got '{other}'"),
                });
            }
        };

        let webhook_url = get("WEBHOOK_URL")
            .map(|raw| parse_url("WEBHOOK_URL", &raw))
            .transpose()?;

        // Validate webhook URL is set if mode is webhook
        if bot_mode == BotMode::Webhook && webhook_url.is_none() {
            return Err(ConfigError::Missing("WEBHOOK_URL"));
        }

        let owner_ids = get("OWNER_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse("OWNER_IDS", s))
            .collect::<Result<Vec<u64>, _>>()?;

        let log_channel = get("LOG_CHANNEL")
            .map(|raw| parse::<i64>("LOG_CHANNEL", &raw).map(ChatId))
            .transpose()?;

        let alert_log = get("ALERT_LOG")
            .map(|raw| {
                raw.parse::<AlertTarget>()
                    .map_err(|reason| ConfigError::Invalid { key: "ALERT_LOG", reason })
            })
            .transpose()?;

        let alert_api = get("ALERT_API")
            .map(|raw| parse_url("ALERT_API", &raw))
            .transpose()?;

        let plugin_flags = get("PLUGIN_FLAG")
            .unwrap_or_default()
            .split(';')
            .map(|flag| flag.trim().to_lowercase())
            .filter(|flag| !flag.is_empty())
            .collect();

        Ok(Self {
            bot_token,
            bot_mode,
            webhook_url,
            webhook_port: get("WEBHOOK_PORT")
                .map(|raw| parse("WEBHOOK_PORT", &raw))
                .transpose()?
                .unwrap_or(8443),
            webhook_secret: get("WEBHOOK_SECRET"),
            owner_ids,
            log_channel,
            alert_log,
            alert_api,
            alert_user: get("ALERT_USER"),
            alert_pass: get("ALERT_PASS"),
            plugin_flags,
            webserver_host: get("WEBSERVER_HOST")
                .map(|raw| parse("WEBSERVER_HOST", &raw))
                .transpose()?
                .unwrap_or(IpAddr::from([0, 0, 0, 0])),
            webserver_port: get("WEBSERVER_PORT")
                .map(|raw| parse("WEBSERVER_PORT", &raw))
                .transpose()?
                .unwrap_or(8080),
        })
    }

    pub fn has_alert_sink(&self) -> bool {
        self.alert_log.is_some() || self.alert_api.is_some()
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            forward_alerts: self.has_alert_sink(),
            ..Default::default()
        }
    }

    /// Address of the metrics server.
    pub fn web_addr(&self) -> SocketAddr {
        SocketAddr::new(self.webserver_host, self.webserver_port)
    }
}

/// Flag that disables the plugin called `name`.
///
/// `"Message Stats"` is disabled by `disable_message_stats_plugin`.
pub fn plugin_flag(name: &str) -> String {
    format!("disable_{}_plugin", name.to_lowercase().replace(' ', "_"))
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        reason: format!("'{raw}': {err}"),
    })
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|err| ConfigError::Invalid {
        key,
        reason: format!("'{raw}': {err}"),
    })
}
