#![deny(missing_docs)]
//! Telegram transport adapter for Clip Relay.

/// Telegram transport configuration.
pub mod config;
/// Credential document persisted for the Telegram session.
pub mod credentials;
/// `SessionProvider` implementation over the Bot API.
pub mod provider;
