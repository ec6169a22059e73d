//! services/bot/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where inbound updates come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intake {
    LongPolling,
    Webhook { url: String, secret: String },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub database_url: String,
    pub log_level: Level,
    pub bind_address: SocketAddr,
    pub intake: Intake,
    pub admin_id: i64,
    /// Channels every user must be subscribed to.
    pub channels: Vec<String>,
    /// Channels that receive a copy of every delivered presentation.
    pub archive_channels: Vec<String>,
    pub gemini_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub assets_dir: PathBuf,
    pub output_dir: PathBuf,
    pub session_ttl: Duration,
    pub retry_attempts: u32,
    pub outline_attempts: u32,
    pub retry_delay: Duration,
    pub signup_bonus: i64,
    pub referral_bonus: i64,
    pub guide_url: Option<String>,
    pub templates_url: Option<String>,
    pub payment_details: String,
}

const DEFAULT_PAYMENT_DETAILS: &str =
    "Balansni to'ldirish uchun administratorga murojaat qiling va to'lov chekini shu yerga yuboring.";

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        // --- Telegram and Database ---
        let bot_token = vars.required("BOT_TOKEN")?;
        let database_url = vars.required("DATABASE_URL")?;
        let admin_id = vars.parsed_required::<i64>("ADMIN_ID")?;

        let channels = channel_list(&vars.required("CHANNELS")?);
        if channels.is_empty() {
            return Err(ConfigError::InvalidValue(
                "CHANNELS".to_string(),
                "at least one channel is required".to_string(),
            ));
        }
        let archive_channels = channel_list(&vars.optional("ARCHIVE_CHANNELS").unwrap_or_default());
        for channel in channels.iter().chain(archive_channels.iter()) {
            if !is_channel_ref(channel) {
                return Err(ConfigError::InvalidValue(
                    "CHANNELS".to_string(),
                    format!("'{}' is neither @name nor a numeric id", channel),
                ));
            }
        }

        // --- Server and Logging ---
        let log_level_str = vars.optional("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;
        let bind_address = vars
            .optional("BIND_ADDRESS")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;
        let intake = match vars.optional("WEBHOOK_URL") {
            Some(url) => Intake::Webhook {
                url,
                secret: vars.required("WEBHOOK_SECRET")?,
            },
            None => Intake::LongPolling,
        };

        // --- Text Provider ---
        let gemini_api_key = vars.required("GEMINI_API_KEY")?;
        let llm_base_url = vars
            .optional("LLM_BASE_URL")
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta/openai".to_string());
        let llm_model = vars.optional("LLM_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string());

        // --- Generation Pipeline ---
        let assets_dir = PathBuf::from(vars.optional("ASSETS_DIR").unwrap_or_else(|| "./shablonlar".to_string()));
        let output_dir = PathBuf::from(vars.optional("OUTPUT_DIR").unwrap_or_else(|| "./output".to_string()));
        let session_ttl = Duration::from_secs(vars.parsed_or("SESSION_TTL_SECS", 3600u64)?);
        let retry_attempts = vars.parsed_or("RETRY_ATTEMPTS", 3u32)?;
        let outline_attempts = vars.parsed_or("OUTLINE_ATTEMPTS", 5u32)?;
        let retry_delay = Duration::from_millis(vars.parsed_or("RETRY_DELAY_MS", 2000u64)?);
        if retry_attempts == 0 || outline_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_ATTEMPTS".to_string(),
                "attempt counts must be at least 1".to_string(),
            ));
        }

        // --- Ledger ---
        let signup_bonus = vars.parsed_or("SIGNUP_BONUS", 10_000i64)?;
        let referral_bonus = vars.parsed_or("REFERRAL_BONUS", 1_000i64)?;
        if signup_bonus <= 0 || referral_bonus <= 0 {
            return Err(ConfigError::InvalidValue(
                "SIGNUP_BONUS".to_string(),
                "bonus amounts must be positive".to_string(),
            ));
        }

        // --- Informational Links ---
        let guide_url = vars.optional("GUIDE_URL");
        let templates_url = vars.optional("TEMPLATES_URL");
        let payment_details = vars
            .optional("PAYMENT_DETAILS")
            .unwrap_or_else(|| DEFAULT_PAYMENT_DETAILS.to_string());

        Ok(Self {
            bot_token,
            database_url,
            log_level,
            bind_address,
            intake,
            admin_id,
            channels,
            archive_channels,
            gemini_api_key,
            llm_base_url,
            llm_model,
            assets_dir,
            output_dir,
            session_ttl,
            retry_attempts,
            outline_attempts,
            retry_delay,
            signup_bonus,
            referral_bonus,
            guide_url,
            templates_url,
            payment_details,
        })
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    /// Unset and blank values are treated the same.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
    }

    fn parsed_required<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        raw.parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
    }

    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
            None => Ok(default),
        }
    }
}

fn channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_channel_ref(channel: &str) -> bool {
    match channel.strip_prefix('@') {
        Some(name) => !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => channel.parse::<i64>().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("BOT_TOKEN", "123:abc"),
            ("DATABASE_URL", "postgres://localhost/prezentor"),
            ("ADMIN_ID", "5031"),
            ("CHANNELS", "@prezentor_news, -1001234567890"),
            ("GEMINI_API_KEY", "key"),
            ("ARCHIVE_CHANNELS", ""),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_fill_every_optional_value() {
        let config = load(&base()).unwrap();
        assert_eq!(config.channels, vec!["@prezentor_news", "-1001234567890"]);
        assert!(config.archive_channels.is_empty());
        assert_eq!(config.intake, Intake::LongPolling);
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.outline_attempts, 5);
        assert_eq!(config.signup_bonus, 10_000);
        assert_eq!(config.llm_model, "gemini-2.5-flash");
    }

    #[test]
    fn missing_required_variable_fails_fast() {
        let mut vars = base();
        vars.remove("BOT_TOKEN");
        assert!(matches!(load(&vars), Err(ConfigError::MissingVar(key)) if key == "BOT_TOKEN"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut vars = base();
        vars.insert("ADMIN_ID", "admin");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue(key, _)) if key == "ADMIN_ID"));

        let mut vars = base();
        vars.insert("CHANNELS", " , ");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue(key, _)) if key == "CHANNELS"));

        let mut vars = base();
        vars.insert("CHANNELS", "prezentor news");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn webhook_requires_a_secret() {
        let mut vars = base();
        vars.insert("WEBHOOK_URL", "https://bot.example.com/telegram/webhook");
        assert!(matches!(load(&vars), Err(ConfigError::MissingVar(key)) if key == "WEBHOOK_SECRET"));

        vars.insert("WEBHOOK_SECRET", "s3cret");
        let config = load(&vars).unwrap();
        assert!(matches!(config.intake, Intake::Webhook { .. }));
    }
}
