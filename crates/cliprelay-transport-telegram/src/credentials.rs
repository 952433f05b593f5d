//! Credential document persisted for the Telegram session.
//!
//! Holds the bot identity the session is bound to and the `getUpdates`
//! offset, so a restart neither loses nor replays updates.

use cliprelay_core::credentials::Credentials;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Telegram view of the opaque credential document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramCredentials {
    /// Bot user id returned by `getMe`.
    pub bot_id: u64,
    /// Bot username, without `@`.
    pub username: Option<String>,
    /// Next `getUpdates` offset.
    #[serde(default)]
    pub update_offset: i32,
}

impl TelegramCredentials {
    /// Read the Telegram fields out of persisted credentials.
    ///
    /// A document this adapter cannot read is treated as unregistered.
    #[must_use]
    pub fn from_credentials(credentials: Option<&Credentials>) -> Option<Self> {
        let credentials = credentials?;
        match serde_json::from_value(credentials.0.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Persisted credentials are not usable, pairing again: {e}");
                None
            }
        }
    }

    /// Wrap into the opaque document the core persists.
    #[must_use]
    pub fn to_credentials(&self) -> Credentials {
        Credentials(serde_json::to_value(self).unwrap_or_default())
    }

    /// Handle the operator adds to the group.
    #[must_use]
    pub fn handle(&self) -> String {
        self.username
            .as_ref()
            .map_or_else(|| format!("bot {}", self.bot_id), |name| format!("@{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_through_opaque_document() {
        let creds = TelegramCredentials {
            bot_id: 42,
            username: Some("clip_relay_bot".to_string()),
            update_offset: 1001,
        };
        let opaque = creds.to_credentials();
        assert_eq!(
            TelegramCredentials::from_credentials(Some(&opaque)),
            Some(creds)
        );
    }

    #[test]
    fn test_foreign_document_is_unregistered() {
        let foreign = Credentials(json!({"noiseKey": "abc"}));
        assert_eq!(TelegramCredentials::from_credentials(Some(&foreign)), None);
        assert_eq!(TelegramCredentials::from_credentials(None), None);
    }

    #[test]
    fn test_missing_offset_defaults_to_zero() {
        let doc = Credentials(json!({"bot_id": 7, "username": null}));
        let parsed = TelegramCredentials::from_credentials(Some(&doc));
        assert_eq!(parsed.as_ref().map(|c| c.update_offset), Some(0));
        assert_eq!(parsed.map(|c| c.handle()), Some("bot 7".to_string()));
    }
}
