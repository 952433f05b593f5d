//! Configuration and settings management
//!
//! Loads relay settings from optional config files and environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default Media Resolver API endpoint.
pub const DEFAULT_MEDIA_RESOLVER_URL: &str = "https://tikwm.com/api/";
/// Default credential directory, relative to the working directory.
pub const DEFAULT_AUTH_DIR: &str = "auth_info_bot";
/// Wait before requesting a pairing code, giving the provider time to settle.
pub const DEFAULT_PAIRING_DELAY_MS: u64 = 1500;

/// Relay settings shared by the session state machine and dispatcher.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaySettings {
    /// Phone number used when requesting a pairing code.
    /// When absent the operator is prompted interactively.
    pub bot_phone_number: Option<String>,

    /// The single conversation the relay watches and replies into.
    /// When absent the session still starts but nothing is dispatched.
    pub target_conversation_id: Option<String>,

    /// Directory holding persisted credentials.
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,

    /// Media Resolver API endpoint.
    #[serde(default = "default_media_resolver_url")]
    pub media_resolver_url: String,

    /// Optional request timeout for the Media Resolver API.
    pub media_timeout_secs: Option<u64>,

    /// Delay before a pairing code is requested.
    #[serde(default = "default_pairing_delay_ms")]
    pub pairing_delay_ms: u64,

    /// Delay before re-entering initialization after a transient disconnect.
    #[serde(default)]
    pub reconnect_delay_ms: u64,
}

fn default_auth_dir() -> String {
    DEFAULT_AUTH_DIR.to_string()
}

fn default_media_resolver_url() -> String {
    DEFAULT_MEDIA_RESOLVER_URL.to_string()
}

const fn default_pairing_delay_ms() -> u64 {
    DEFAULT_PAIRING_DELAY_MS
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bot_phone_number: None,
            target_conversation_id: None,
            auth_dir: default_auth_dir(),
            media_resolver_url: default_media_resolver_url(),
            media_timeout_secs: None,
            pairing_delay_ms: DEFAULT_PAIRING_DELAY_MS,
            reconnect_delay_ms: 0,
        }
    }
}

/// Build the layered configuration source shared by all crates.
///
/// Order (later wins): `config/default`, `config/{RUN_MODE}`, `config/local`,
/// `APP__`-prefixed environment variables, bare environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE onto snake_case keys
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl RelaySettings {
    /// Load settings from files and environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading or deserialization fails.
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings: Self = build_config()?.try_deserialize()?;
        settings.bot_phone_number = normalize(settings.bot_phone_number.take());
        settings.target_conversation_id = normalize(settings.target_conversation_id.take());
        Ok(settings)
    }

    /// Credential store location.
    #[must_use]
    pub fn auth_path(&self) -> PathBuf {
        PathBuf::from(&self.auth_dir)
    }

    /// Pairing delay as a `Duration`.
    #[must_use]
    pub const fn pairing_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_delay_ms)
    }

    /// Reconnect delay as a `Duration`.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Media Resolver timeout, if configured.
    #[must_use]
    pub fn media_timeout(&self) -> Option<Duration> {
        self.media_timeout_secs.map(Duration::from_secs)
    }
}

/// Treat blank strings as unset.
fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
