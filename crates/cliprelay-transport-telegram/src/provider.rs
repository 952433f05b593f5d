//! Telegram Bot API session provider
//!
//! Each `connect` spawns a long-polling task that reports lifecycle,
//! credential and message events to the core. Telegram binds a bot by token,
//! so "pairing" resolves the bot identity with `getMe` and hands the operator
//! the bot handle to add to the group.

use crate::config::TelegramSettings;
use crate::credentials::TelegramCredentials;
use anyhow::Result;
use async_trait::async_trait;
use cliprelay_core::credentials::Credentials;
use cliprelay_core::media::Caption;
use cliprelay_core::session::provider::{
    Connection, ConversationId, DisconnectReason, InboundMessage, MessageBody, OutboundMessage,
    ProviderError, QuotedMessage, SessionEvent, SessionProvider,
};
use std::sync::{Mutex, PoisonError};
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, InputFile, MessageId, MessageKind, ParseMode, ReplyParameters, UpdateKind,
};
use teloxide::{ApiError, RequestError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Telegram caption limit, in UTF-16 code units of the visible text.
const MAX_CAPTION_LEN: usize = 1024;

const CAPTION_SEPARATOR: &str = "\n\n";

/// Tracks the currently running poll task.
#[derive(Default)]
struct LiveState {
    cancel: Option<CancellationToken>,
    pairing: Option<oneshot::Sender<TelegramCredentials>>,
}

/// [`SessionProvider`] backed by the Telegram Bot API.
pub struct TelegramProvider {
    bot: Bot,
    poll_timeout: u32,
    live: Mutex<LiveState>,
}

impl TelegramProvider {
    /// Build a provider from transport settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        // Client timeout must outlive the long poll or every request aborts
        let client = teloxide::net::default_reqwest_settings()
            .timeout(settings.client_timeout())
            .build()?;
        let bot = Bot::with_client(settings.telegram_token.clone(), client);
        Ok(Self::with_bot(bot, settings.poll_timeout()))
    }

    /// Build a provider around an existing bot handle.
    #[must_use]
    pub fn with_bot(bot: Bot, poll_timeout: u32) -> Self {
        Self {
            bot,
            poll_timeout,
            live: Mutex::new(LiveState::default()),
        }
    }

    fn live(&self) -> std::sync::MutexGuard<'_, LiveState> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TelegramProvider {
    fn drop(&mut self) {
        if let Some(cancel) = self.live().cancel.take() {
            cancel.cancel();
        }
    }
}

#[async_trait]
impl SessionProvider for TelegramProvider {
    async fn connect(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<Connection, ProviderError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let stored = TelegramCredentials::from_credentials(credentials.as_ref());
        let registered = stored.is_some();

        let start = {
            let mut live = self.live();
            if let Some(previous) = live.cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            match stored {
                Some(creds) => {
                    live.pairing = None;
                    Start::Registered(creds)
                }
                None => {
                    let (pair_tx, pair_rx) = oneshot::channel();
                    live.pairing = Some(pair_tx);
                    Start::AwaitPairing(pair_rx)
                }
            }
        };

        let poll = PollLoop {
            bot: self.bot.clone(),
            events: tx,
            cancel,
            poll_timeout: self.poll_timeout,
        };
        tokio::spawn(poll.run(start));

        debug!(registered, "Telegram connection started");
        Ok(Connection {
            registered,
            events: rx,
        })
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ProviderError> {
        info!(
            phone = %phone_number,
            "Telegram binds bots by token; resolving bot identity for pairing"
        );
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| ProviderError::Pairing(e.to_string()))?;

        let creds = TelegramCredentials {
            bot_id: me.id.0,
            username: me.username.clone(),
            update_offset: 0,
        };
        let handle = creds.handle();

        let pending = self
            .live()
            .pairing
            .take()
            .ok_or(ProviderError::NotConnected)?;
        pending
            .send(creds)
            .map_err(|_| ProviderError::NotConnected)?;

        Ok(format!("{handle} (add this bot to the target group)"))
    }

    async fn send(
        &self,
        conversation: &ConversationId,
        message: OutboundMessage,
    ) -> Result<(), ProviderError> {
        let chat_id = parse_chat_id(conversation)?;

        let result = match message {
            OutboundMessage::Text { text, quoted } => {
                let mut req = self.bot.send_message(chat_id, text);
                if let Some(params) = quoted.as_ref().and_then(reply_parameters) {
                    req = req.reply_parameters(params);
                }
                req.await.map(drop)
            }
            OutboundMessage::Video { url, caption } => self
                .bot
                .send_video(chat_id, InputFile::url(parse_media_url(&url)?))
                .caption(caption_html(&caption))
                .parse_mode(ParseMode::Html)
                .await
                .map(drop),
            OutboundMessage::Audio { url, mimetype } => {
                // Telegram infers the encoding from the file itself
                debug!(%mimetype, "Sending audio by URL");
                self.bot
                    .send_audio(chat_id, InputFile::url(parse_media_url(&url)?))
                    .await
                    .map(drop)
            }
        };

        result.map_err(|e| ProviderError::Send(e.to_string()))
    }
}

/// How a poll task begins.
enum Start {
    Registered(TelegramCredentials),
    AwaitPairing(oneshot::Receiver<TelegramCredentials>),
}

struct PollLoop {
    bot: Bot,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    poll_timeout: u32,
}

impl PollLoop {
    async fn run(self, start: Start) {
        if let Some(reason) = self.drive(start).await {
            info!(%reason, "Telegram connection closed");
            let _ = self.events.send(SessionEvent::Closed(reason)).await;
        }
    }

    /// Returns the close reason, or `None` when cancelled or nobody listens.
    async fn drive(&self, start: Start) -> Option<DisconnectReason> {
        let mut creds = match start {
            Start::Registered(creds) => creds,
            Start::AwaitPairing(pairing) => {
                let creds = tokio::select! {
                    () = self.cancel.cancelled() => return None,
                    paired = pairing => paired.ok()?,
                };
                self.emit(SessionEvent::CredentialsUpdated(creds.to_credentials()))
                    .await?;
                creds
            }
        };

        let me = match self.bot.get_me().send().await {
            Ok(me) => me,
            Err(e) => return Some(disconnect_reason(&e)),
        };
        if me.id.0 != creds.bot_id {
            warn!(
                stored = creds.bot_id,
                actual = me.id.0,
                "Token belongs to a different bot than the stored session"
            );
            return Some(DisconnectReason::LoggedOut);
        }
        if let Err(e) = self.bot.delete_webhook().send().await {
            warn!("Failed to clear webhook: {e}");
        }

        info!(username = ?me.username, "Telegram bot connected");
        self.emit(SessionEvent::Open).await?;

        loop {
            let request = self
                .bot
                .get_updates()
                .offset(creds.update_offset)
                .timeout(self.poll_timeout)
                .allowed_updates(vec![AllowedUpdate::Message])
                .send();

            let updates = tokio::select! {
                () = self.cancel.cancelled() => return None,
                result = request => match result {
                    Ok(updates) => updates,
                    Err(e) => {
                        warn!("Telegram getUpdates failed: {e}");
                        return Some(disconnect_reason(&e));
                    }
                },
            };

            if updates.is_empty() {
                continue;
            }
            debug!(count = updates.len(), "Got Telegram updates");

            for update in updates {
                creds.update_offset = update.id.as_offset();
                match update.kind {
                    UpdateKind::Message(msg) => {
                        let inbound = to_inbound(&msg, creds.bot_id, me.username.as_deref());
                        self.emit(SessionEvent::Message(inbound)).await?;
                    }
                    other => debug!("Ignoring non-message update: {other:?}"),
                }
            }
            self.emit(SessionEvent::CredentialsUpdated(creds.to_credentials()))
                .await?;
        }
    }

    async fn emit(&self, event: SessionEvent) -> Option<()> {
        self.events.send(event).await.ok()
    }
}

/// Map a Bot API failure onto the core's disconnect reasons.
fn disconnect_reason(error: &RequestError) -> DisconnectReason {
    match error {
        RequestError::Api(ApiError::InvalidToken) => DisconnectReason::LoggedOut,
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => {
            DisconnectReason::ConnectionReplaced
        }
        RequestError::Network(_) | RequestError::Io(_) => DisconnectReason::ConnectionLost,
        RequestError::RetryAfter(_) => DisconnectReason::TimedOut,
        other => DisconnectReason::Other(other.to_string()),
    }
}

fn to_inbound(msg: &Message, bot_id: u64, bot_username: Option<&str>) -> InboundMessage {
    let body = matches!(msg.kind, MessageKind::Common(_)).then(|| MessageBody {
        text: msg
            .text()
            .or_else(|| msg.caption())
            .map(|text| strip_own_mention(text, bot_username)),
    });
    let sender = msg.from.as_ref();

    InboundMessage {
        id: msg.id.0.to_string(),
        sender: sender.map(|u| u.id.0.to_string()).unwrap_or_default(),
        conversation: ConversationId::new(msg.chat.id.0.to_string()),
        body,
        from_self: sender.is_some_and(|u| u.id.0 == bot_id),
    }
}

/// Turn a group-style `/music@this_bot <url>` into `/music <url>`.
///
/// Commands addressed to other bots are left untouched.
fn strip_own_mention(text: &str, bot_username: Option<&str>) -> String {
    let Some(username) = bot_username else {
        return text.to_string();
    };
    if !text.starts_with('/') {
        return text.to_string();
    }
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    let (command, rest) = text.split_at(end);
    match command.split_once('@') {
        Some((name, mention)) if mention.eq_ignore_ascii_case(username) => {
            format!("{name}{rest}")
        }
        _ => text.to_string(),
    }
}

fn parse_chat_id(conversation: &ConversationId) -> Result<ChatId, ProviderError> {
    conversation
        .as_str()
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| ProviderError::InvalidConversation(conversation.to_string()))
}

fn parse_media_url(url: &str) -> Result<reqwest::Url, ProviderError> {
    reqwest::Url::parse(url).map_err(|e| ProviderError::Send(format!("Invalid media URL: {e}")))
}

fn reply_parameters(quoted: &QuotedMessage) -> Option<ReplyParameters> {
    quoted
        .id
        .parse::<i32>()
        .ok()
        .map(|id| ReplyParameters::new(MessageId(id)).allow_sending_without_reply())
}

/// Longest prefix of `text` that fits in `budget` UTF-16 code units.
fn truncate_utf16(text: &str, budget: usize) -> &str {
    let mut used = 0;
    for (idx, ch) in text.char_indices() {
        used += ch.len_utf16();
        if used > budget {
            return &text[..idx];
        }
    }
    text
}

/// Bold author, blank line, title; HTML-escaped.
///
/// The visible text stays within the caption limit, which Telegram measures
/// after entity parsing and in UTF-16 code units.
fn caption_html(caption: &Caption) -> String {
    let separator_len = CAPTION_SEPARATOR.encode_utf16().count();
    let author = truncate_utf16(
        &caption.author,
        MAX_CAPTION_LEN.saturating_sub(separator_len),
    );
    let used = author.encode_utf16().count() + separator_len;
    let title = truncate_utf16(&caption.title, MAX_CAPTION_LEN.saturating_sub(used));
    format!(
        "<b>{}</b>{CAPTION_SEPARATOR}{}",
        html_escape::encode_text(author),
        html_escape::encode_text(title)
    )
}
