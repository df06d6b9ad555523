//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default IMAP port (implicit TLS).
const DEFAULT_IMAP_PORT: u16 = 993;

/// Default delay between poll cycles.
const DEFAULT_CHECK_TIMING_SECS: u64 = 60;

/// Default Telegram Bot API endpoint.
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// IMAP mailbox configuration.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
}

/// Telegram Bot API configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Chat or channel id (`-100...` or `@channelname`).
    pub chat_id: String,
    pub api_base: String,
}

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub imap: ImapConfig,
    pub telegram: TelegramConfig,
    /// Delay between poll cycles.
    pub check_interval: Duration,
    /// Directory for the log file. File logging is off when unset.
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let imap = ImapConfig {
            host: required("IMAP_SERVER")?,
            port: parse_or(&lookup, "IMAP_PORT", DEFAULT_IMAP_PORT)?,
            username: required("EMAIL_ACCOUNT")?,
            password: SecretString::from(required("EMAIL_PASSWORD")?),
            mailbox: lookup("IMAP_MAILBOX")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "INBOX".to_string()),
        };

        let telegram = TelegramConfig {
            bot_token: SecretString::from(required("TELEGRAM_TOKEN")?),
            chat_id: required("TELEGRAM_CHANNEL")?,
            api_base: lookup("TELEGRAM_API_BASE")
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
        };

        let check_secs: u64 = parse_or(&lookup, "CHECK_TIMING_SECONDS", DEFAULT_CHECK_TIMING_SECS)?;
        if check_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHECK_TIMING_SECONDS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let log_dir = lookup("RELAY_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            imap,
            telegram,
            check_interval: Duration::from_secs(check_secs),
            log_dir,
        })
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
