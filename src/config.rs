use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::relay::completion::CompletionConfig;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 500;
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Errors that can occur when loading configuration.
///
/// Every variant is fatal: the process must not start serving without a
/// valid platform credential and a reachable callback address.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    Missing(&'static str),
    /// A variable is set but its value is unusable.
    Invalid { var: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(var) => write!(f, "missing required environment variable {var}"),
            Self::Invalid { var, reason } => write!(f, "invalid value for {var}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    /// Public base address, without a trailing slash.
    pub public_url: String,
    /// Completion provider key. `None` puts the completion client in degraded mode.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_max_tokens: u32,
    pub completion_timeout: Duration,
    pub completion_retries: u32,
    pub port: u16,
    /// Directory for state files (logs, database).
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    /// Upper bound on background processing tasks running at once.
    pub max_in_flight: usize,
    /// Prior turns sent to the provider as context (0 = none).
    pub context_turns: usize,
    /// Operator chat that receives forwarded log lines.
    pub log_chat_id: Option<i64>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Values are trimmed and
    /// empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Invalid {
                var: "TELEGRAM_BOT_TOKEN",
                reason: "expected format 123456789:ABCdefGHI...".into(),
            });
        }

        let public_url = get("PUBLIC_URL").ok_or(ConfigError::Missing("PUBLIC_URL"))?;
        let public_url = validate_public_url(&public_url)?;

        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let database_path = get("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("conversations.db"));

        let max_in_flight: usize = parse_or(&get, "MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?;
        if max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_IN_FLIGHT",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            telegram_bot_token,
            public_url,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_max_tokens: parse_or(&get, "OPENAI_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            completion_timeout: Duration::from_secs(parse_or(&get, "COMPLETION_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            completion_retries: parse_or(&get, "COMPLETION_RETRIES", 0)?,
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            data_dir,
            database_path,
            max_in_flight,
            context_turns: parse_or(&get, "CONTEXT_TURNS", 0)?,
            log_chat_id: get("LOG_CHAT_ID")
                .map(|v| parse_value("LOG_CHAT_ID", &v))
                .transpose()?,
        })
    }

    /// The address Telegram should deliver updates to.
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.public_url)
    }

    pub fn completion(&self) -> CompletionConfig {
        CompletionConfig {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            model: self.openai_model.clone(),
            max_tokens: self.openai_max_tokens,
            timeout: self.completion_timeout,
            retries: self.completion_retries,
        }
    }
}

fn validate_public_url(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid { var: "PUBLIC_URL", reason };
    let url = reqwest::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(v) => parse_value(var, &v),
        None => Ok(default),
    }
}

fn parse_value<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: format!("'{value}': {e}"),
    })
}
