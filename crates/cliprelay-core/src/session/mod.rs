//! Session lifecycle state machine
//!
//! Drives one connection at a time through
//! `Initializing → Authenticating → Open`, persisting credential changes as
//! they arrive and handing inbound messages to the [`Dispatcher`]. A
//! non-terminal close loops back to `Initializing`; only
//! [`DisconnectReason::LoggedOut`] ends the machine in `Closed`.

/// Provider boundary types.
pub mod provider;

use crate::config::RelaySettings;
use crate::credentials::{CredentialStore, Credentials};
use crate::dispatch::Dispatcher;
use crate::media::MediaResolver;
use async_trait::async_trait;
use provider::{ConversationId, DisconnectReason, SessionEvent, SessionProvider};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Loading credentials and opening a connection.
    Initializing,
    /// Waiting for the operator to pair the device.
    Authenticating,
    /// Connected; inbound messages are dispatched.
    Open,
    /// Stopped.
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Authenticating => "authenticating",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Snapshot of the connection as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Current status.
    pub status: SessionStatus,
    /// Credentials are bound to an identity.
    pub registered: bool,
    /// Watched conversation.
    pub target: Option<ConversationId>,
}

/// Source of a phone number when none is configured.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhonePrompt: Send + Sync {
    /// Ask the operator for the bot's phone number.
    async fn ask_phone_number(&self) -> std::io::Result<String>;
}

/// What ended one connection attempt.
enum Step {
    Reconnect(DisconnectReason),
    Terminate(DisconnectReason),
}

/// Owns the [`Session`] and reacts to provider events.
pub struct SessionMachine {
    provider: Arc<dyn SessionProvider>,
    store: Arc<dyn CredentialStore>,
    prompt: Arc<dyn PhonePrompt>,
    dispatcher: Arc<Dispatcher>,
    phone_number: Option<String>,
    pairing_delay: Duration,
    reconnect_delay: Duration,
    session: Session,
    status_tx: broadcast::Sender<SessionStatus>,
}

impl SessionMachine {
    /// Build a machine from its collaborators and settings.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        store: Arc<dyn CredentialStore>,
        resolver: Arc<dyn MediaResolver>,
        prompt: Arc<dyn PhonePrompt>,
        settings: &RelaySettings,
    ) -> Self {
        let target = settings
            .target_conversation_id
            .as_deref()
            .map(ConversationId::new);
        if target.is_none() {
            warn!("No target conversation configured, dispatch is disabled");
        }

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&provider),
            resolver,
            target.clone(),
        ));
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        Self {
            provider,
            store,
            prompt,
            dispatcher,
            phone_number: settings.bot_phone_number.clone(),
            pairing_delay: settings.pairing_delay(),
            reconnect_delay: settings.reconnect_delay(),
            session: Session {
                status: SessionStatus::Initializing,
                registered: false,
                target,
            },
            status_tx,
        }
    }

    /// Current session snapshot.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Receive every status transition from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Run until the provider reports a terminal disconnect.
    ///
    /// Every other disconnect, a failed connect, or an event stream that ends
    /// without a close re-enters `Initializing` on the same machine.
    pub async fn run(&mut self) -> DisconnectReason {
        loop {
            match self.connect_once().await {
                Step::Terminate(reason) => {
                    warn!(%reason, "Session terminated, re-pairing is required");
                    self.transition(SessionStatus::Closed);
                    return reason;
                }
                Step::Reconnect(reason) => {
                    info!(%reason, "Connection closed, reconnecting");
                    if !self.reconnect_delay.is_zero() {
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        }
    }

    async fn connect_once(&mut self) -> Step {
        self.transition(SessionStatus::Initializing);
        info!("Preparing connection...");

        let credentials = match self.store.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Ignoring unreadable credentials: {e}");
                None
            }
        };

        let mut connection = match self.provider.connect(credentials).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to open connection: {e}");
                return Step::Reconnect(DisconnectReason::Other(e.to_string()));
            }
        };

        self.session.registered = connection.registered;
        if !connection.registered {
            self.authenticate().await;
        }

        while let Some(event) = connection.events.recv().await {
            match event {
                SessionEvent::Open => {
                    self.session.registered = true;
                    self.transition(SessionStatus::Open);
                    info!(
                        target_conversation = ?self.session.target,
                        "==================== RELAY CONNECTED ===================="
                    );
                }
                SessionEvent::Closed(reason) if reason.is_terminal() => {
                    return Step::Terminate(reason);
                }
                SessionEvent::Closed(reason) => return Step::Reconnect(reason),
                SessionEvent::CredentialsUpdated(credentials) => {
                    self.persist(&credentials).await;
                }
                SessionEvent::Message(msg) => {
                    if self.session.status == SessionStatus::Open {
                        self.dispatcher.spawn(msg);
                    } else {
                        debug!(status = %self.session.status, "Dropping message, session not open");
                    }
                }
            }
        }

        Step::Reconnect(DisconnectReason::ConnectionLost)
    }

    /// Request a pairing code and show it to the operator.
    ///
    /// Failure abandons this attempt: the session moves to `Closed` but keeps
    /// honoring the connection's remaining lifecycle events.
    async fn authenticate(&mut self) {
        self.transition(SessionStatus::Authenticating);
        tokio::time::sleep(self.pairing_delay).await;
        info!("No registered session found, requesting pairing code...");

        let phone_number = match &self.phone_number {
            Some(number) => number.clone(),
            None => match self.prompt.ask_phone_number().await {
                Ok(number) => number.trim().to_string(),
                Err(e) => {
                    error!("Failed to read phone number: {e}");
                    self.transition(SessionStatus::Closed);
                    return;
                }
            },
        };

        match self.provider.request_pairing_code(&phone_number).await {
            Ok(code) => {
                info!("==================== PAIRING ====================");
                info!("YOUR PAIRING CODE: {code}");
                info!("Link this device from the messaging app using the code above.");
                info!("=================================================");
            }
            Err(e) => {
                error!("Failed to request pairing code: {e}");
                self.transition(SessionStatus::Closed);
            }
        }
    }

    async fn persist(&self, credentials: &Credentials) {
        if let Err(e) = self.store.save(credentials).await {
            error!("Failed to persist credentials: {e}");
        }
    }

    fn transition(&mut self, next: SessionStatus) {
        let previous = self.session.status;
        self.session.status = next;
        debug!(from = %previous, to = %next, "Session state changed");
        // No subscribers is fine
        let _ = self.status_tx.send(next);
    }
}
