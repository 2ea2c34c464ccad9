//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram Bot API token.
    pub bot_token: String,
    /// Path to the local user database.
    pub db_path: String,
    /// Base URL of the card balance service.
    pub gateway_base_url: String,
    /// Cooldown after a successful balance check.
    pub cooldown_after_success: Duration,
    /// Cooldown after a failed balance check.
    pub cooldown_after_failure: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            db_path: "./data/soup-card-bot.db".to_string(),
            gateway_base_url: "https://meal.gift-cards.ru/api/1/cards".to_string(),
            cooldown_after_success: Duration::from_secs(60),
            cooldown_after_failure: Duration::from_secs(10),
        }
    }
}

impl BotConfig {
    /// Build a config from environment variables. `TELEGRAM_BOT_TOKEN` is
    /// required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".to_string()))?;

        let defaults = Self::default();

        let db_path = std::env::var("CARD_BOT_DB_PATH").unwrap_or(defaults.db_path);
        let gateway_base_url =
            std::env::var("CARD_GATEWAY_URL").unwrap_or(defaults.gateway_base_url);

        let cooldown_after_success =
            parse_secs("CARD_BOT_COOLDOWN_SUCCESS_SECS", defaults.cooldown_after_success)?;
        let cooldown_after_failure =
            parse_secs("CARD_BOT_COOLDOWN_FAILURE_SECS", defaults.cooldown_after_failure)?;

        Ok(Self {
            bot_token,
            db_path,
            gateway_base_url,
            cooldown_after_success,
            cooldown_after_failure,
        })
    }
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}
