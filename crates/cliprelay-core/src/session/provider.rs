//! Messaging Session Provider boundary
//!
//! The provider owns the wire protocol. The core sees it as a connection
//! that yields typed [`SessionEvent`]s and accepts [`OutboundMessage`]s.

use crate::credentials::Credentials;
use crate::media::Caption;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by a session provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Opening the connection failed
    #[error("Connect error: {0}")]
    Connect(String),
    /// Pairing code could not be obtained
    #[error("Pairing error: {0}")]
    Pairing(String),
    /// Outbound message was rejected or not delivered
    #[error("Send error: {0}")]
    Send(String),
    /// Conversation identifier is not valid for this provider
    #[error("Invalid conversation id: {0}")]
    InvalidConversation(String),
    /// No connection is currently open
    #[error("Not connected")]
    NotConnected,
}

/// Identifier of a conversation on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message payload. `text` is absent for media-only or sticker messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageBody {
    /// Plain text or caption.
    pub text: Option<String>,
}

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Provider message id, used for quoting.
    pub id: String,
    /// Sender identifier.
    pub sender: String,
    /// Conversation the message arrived in.
    pub conversation: ConversationId,
    /// Payload; `None` for service events without a message.
    pub body: Option<MessageBody>,
    /// Sent by this session itself.
    pub from_self: bool,
}

impl InboundMessage {
    /// Text content, if the message has a body carrying text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.body.as_ref()?.text.as_deref()
    }
}

/// Reference to a message being replied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedMessage {
    /// Provider message id.
    pub id: String,
    /// Original text, for providers that embed the quote.
    pub text: Option<String>,
}

impl From<&InboundMessage> for QuotedMessage {
    fn from(msg: &InboundMessage) -> Self {
        Self {
            id: msg.id.clone(),
            text: msg.text().map(ToString::to_string),
        }
    }
}

/// Send request handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Plain text, optionally quoting another message.
    Text {
        /// Message text.
        text: String,
        /// Message being replied to.
        quoted: Option<QuotedMessage>,
    },
    /// Video by URL with caption.
    Video {
        /// Playable URL.
        url: String,
        /// Author and title.
        caption: Caption,
    },
    /// Audio by URL.
    Audio {
        /// Playable URL.
        url: String,
        /// Declared encoding.
        mimetype: String,
    },
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Identity revoked; the only terminal reason.
    LoggedOut,
    /// Network dropped.
    ConnectionLost,
    /// Another client took over the session.
    ConnectionReplaced,
    /// Server asked for a restart.
    RestartRequired,
    /// Server or keep-alive timeout.
    TimedOut,
    /// Anything else the provider reports.
    Other(String),
}

impl DisconnectReason {
    /// Whether reconnecting is pointless.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::ConnectionReplaced => f.write_str("connection replaced"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Events delivered by an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection is ready for traffic.
    Open,
    /// Connection closed.
    Closed(DisconnectReason),
    /// Credentials changed and must be persisted.
    CredentialsUpdated(Credentials),
    /// A message arrived.
    Message(InboundMessage),
}

/// A freshly opened connection.
#[derive(Debug)]
pub struct Connection {
    /// Credentials are bound to an identity.
    pub registered: bool,
    /// Lifecycle, credential and message events.
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Messaging transport used by the session state machine and dispatcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a connection using previously persisted credentials.
    async fn connect(&self, credentials: Option<Credentials>)
        -> Result<Connection, ProviderError>;

    /// Ask the transport for a pairing code bound to `phone_number`.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ProviderError>;

    /// Deliver a message to `conversation`.
    async fn send(
        &self,
        conversation: &ConversationId,
        message: OutboundMessage,
    ) -> Result<(), ProviderError>;
}
