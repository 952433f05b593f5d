#![deny(missing_docs)]
//! Clip Relay core library.
//!
//! Session lifecycle, command parsing, media resolution and dispatch for a
//! relay that re-posts short-video media into one watched conversation.

/// Command recognition in inbound text.
pub mod command;
/// Configuration management.
pub mod config;
/// Persisted credential storage.
pub mod credentials;
/// Per-message dispatch cycle.
pub mod dispatch;
/// Media Resolver API client.
pub mod media;
/// Session provider boundary and lifecycle state machine.
pub mod session;

#[cfg(test)]
pub mod testing;
