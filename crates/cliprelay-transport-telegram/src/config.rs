//! Telegram transport settings.

use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default long-poll timeout for `getUpdates`, in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: u32 = 30;

/// Extra headroom the HTTP client gets on top of the long-poll timeout.
const CLIENT_TIMEOUT_MARGIN_SECS: u64 = 15;

/// Telegram transport settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    pub telegram_token: String,
    /// Long-poll timeout for `getUpdates`.
    #[serde(rename = "telegram_poll_timeout_secs")]
    pub poll_timeout_secs: Option<u32>,
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the token is empty.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = cliprelay_core::config::build_config()?.try_deserialize()?;
        if settings.telegram_token.trim().is_empty() {
            return Err(ConfigError::NotFound("telegram_token".to_string()));
        }
        Ok(settings)
    }

    /// Effective long-poll timeout in seconds.
    #[must_use]
    pub fn poll_timeout(&self) -> u32 {
        self.poll_timeout_secs.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS)
    }

    /// HTTP client timeout; must outlive the long poll.
    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_timeout()) + CLIENT_TIMEOUT_MARGIN_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_timeout_defaults() {
        let settings = TelegramSettings {
            telegram_token: "dummy".to_string(),
            poll_timeout_secs: None,
        };
        assert_eq!(settings.poll_timeout(), DEFAULT_POLL_TIMEOUT_SECS);
        assert_eq!(settings.client_timeout(), Duration::from_secs(45));

        let settings = TelegramSettings {
            poll_timeout_secs: Some(5),
            ..settings
        };
        assert_eq!(settings.client_timeout(), Duration::from_secs(20));
    }
}
