//! Dispatch cycle for inbound messages
//!
//! Filter → parse → acknowledge → fetch → reply. Each cycle runs on its own
//! task and touches no state beyond what it was built with.

use crate::command::{self, MediaKind};
use crate::media::{MediaOutcome, MediaResolver};
use crate::session::provider::{
    ConversationId, InboundMessage, OutboundMessage, ProviderError, QuotedMessage,
    SessionProvider,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Acknowledgement sent before the media is fetched.
pub const PROCESSING_TEXT: &str = "⏳ Hang on, processing your request...";
/// Prefix for user-visible failures.
pub const WARNING_MARKER: &str = "⚠️";
/// Encoding declared for audio replies.
pub const AUDIO_MIMETYPE: &str = "audio/mp4";

/// How a dispatch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Filtered out before parsing.
    Ignored,
    /// Text did not carry a command.
    NoCommand,
    /// Media was posted.
    Delivered(MediaKind),
    /// Failure was reported to the conversation.
    Reported,
}

/// Runs dispatch cycles against one target conversation.
pub struct Dispatcher {
    provider: Arc<dyn SessionProvider>,
    resolver: Arc<dyn MediaResolver>,
    target: Option<ConversationId>,
}

impl Dispatcher {
    /// Create a dispatcher. With no `target` every message is ignored.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        resolver: Arc<dyn MediaResolver>,
        target: Option<ConversationId>,
    ) -> Self {
        Self {
            provider,
            resolver,
            target,
        }
    }

    /// Apply the discard rules; returns the text worth parsing.
    fn admit<'a>(&self, msg: &'a InboundMessage) -> Option<&'a str> {
        if msg.body.is_none() || msg.from_self {
            return None;
        }
        if self.target.as_ref() != Some(&msg.conversation) {
            return None;
        }
        msg.text()
    }

    /// Run one dispatch cycle to completion.
    ///
    /// # Errors
    ///
    /// Returns the first outbound send failure; later steps are not run.
    pub async fn handle(&self, msg: InboundMessage) -> Result<DispatchOutcome, ProviderError> {
        let Some(text) = self.admit(&msg) else {
            return Ok(DispatchOutcome::Ignored);
        };
        let Some(cmd) = command::parse(text) else {
            return Ok(DispatchOutcome::NoCommand);
        };
        let target = msg.conversation.clone();

        info!(
            kind = %cmd.kind,
            sender = %msg.sender,
            "Command detected, resolving media"
        );

        let quoted = QuotedMessage::from(&msg);
        self.provider
            .send(
                &target,
                OutboundMessage::Text {
                    text: PROCESSING_TEXT.to_string(),
                    quoted: Some(quoted.clone()),
                },
            )
            .await?;

        let outcome = self.resolver.fetch(&cmd.url, cmd.kind).await;

        match outcome {
            MediaOutcome::Success { kind, url, caption } => {
                let reply = match kind {
                    MediaKind::Video => OutboundMessage::Video { url, caption },
                    MediaKind::Music => OutboundMessage::Audio {
                        url,
                        mimetype: AUDIO_MIMETYPE.to_string(),
                    },
                };
                self.provider.send(&target, reply).await?;
                info!(%kind, "Media delivered");
                Ok(DispatchOutcome::Delivered(kind))
            }
            MediaOutcome::Failure { message } => {
                debug!(%message, "Media resolution failed");
                self.provider
                    .send(
                        &target,
                        OutboundMessage::Text {
                            text: format!("{WARNING_MARKER} {message}"),
                            quoted: Some(quoted),
                        },
                    )
                    .await?;
                Ok(DispatchOutcome::Reported)
            }
        }
    }

    /// Run a dispatch cycle on its own task. Errors are logged, never returned.
    pub fn spawn(self: &Arc<Self>, msg: InboundMessage) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let id = msg.id.clone();
            if let Err(e) = this.handle(msg).await {
                error!(message_id = %id, "Dispatch cycle aborted: {e}");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Caption, MockMediaResolver};
    use crate::session::provider::{MessageBody, MockSessionProvider};
    use crate::testing::inbound;
    use mockall::Sequence;

    const TARGET: &str = "-100200";
    const URL: &str = "https://vt.tiktok.com/ZS1/";

    fn dispatcher(
        provider: MockSessionProvider,
        resolver: MockMediaResolver,
        target: Option<&str>,
    ) -> Dispatcher {
        Dispatcher::new(
            Arc::new(provider),
            Arc::new(resolver),
            target.map(ConversationId::new),
        )
    }

    fn caption() -> Caption {
        Caption {
            author: "Kitty".to_string(),
            title: "cat".to_string(),
        }
    }

    fn is_ack(msg: &OutboundMessage) -> bool {
        matches!(
            msg,
            OutboundMessage::Text { text, quoted: Some(q) } if text == PROCESSING_TEXT && q.id == "7"
        )
    }

    #[tokio::test]
    async fn test_video_ack_then_reply() -> Result<(), ProviderError> {
        let mut seq = Sequence::new();
        let mut provider = MockSessionProvider::new();
        provider
            .expect_send()
            .withf(|conv, msg| conv.as_str() == TARGET && is_ack(msg))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        provider
            .expect_send()
            .withf(|_, msg| {
                matches!(msg, OutboundMessage::Video { url, caption }
                    if url == "https://cdn.example/v.mp4" && caption.author == "Kitty")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut resolver = MockMediaResolver::new();
        resolver
            .expect_fetch()
            .withf(|url, kind| url == URL && *kind == MediaKind::Video)
            .times(1)
            .returning(|_, kind| MediaOutcome::Success {
                kind,
                url: "https://cdn.example/v.mp4".to_string(),
                caption: caption(),
            });

        let d = dispatcher(provider, resolver, Some(TARGET));
        let outcome = d.handle(inbound("7", TARGET, &format!("/video {URL}"))).await?;
        assert_eq!(outcome, DispatchOutcome::Delivered(MediaKind::Video));
        Ok(())
    }

    #[tokio::test]
    async fn test_music_reply_is_audio_without_caption() -> Result<(), ProviderError> {
        let mut provider = MockSessionProvider::new();
        provider
            .expect_send()
            .withf(|_, msg| is_ack(msg))
            .times(1)
            .returning(|_, _| Ok(()));
        provider
            .expect_send()
            .withf(|_, msg| {
                matches!(msg, OutboundMessage::Audio { url, mimetype }
                    if url == "https://cdn.example/m.mp3" && mimetype == AUDIO_MIMETYPE)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut resolver = MockMediaResolver::new();
        resolver
            .expect_fetch()
            .withf(|url, kind| url == URL && *kind == MediaKind::Music)
            .returning(|_, kind| MediaOutcome::Success {
                kind,
                url: "https://cdn.example/m.mp3".to_string(),
                caption: caption(),
            });

        let d = dispatcher(provider, resolver, Some(TARGET));
        let outcome = d.handle(inbound("7", TARGET, &format!("/music {URL}"))).await?;
        assert_eq!(outcome, DispatchOutcome::Delivered(MediaKind::Music));
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_is_quoted_warning() -> Result<(), ProviderError> {
        let mut provider = MockSessionProvider::new();
        provider
            .expect_send()
            .withf(|_, msg| is_ack(msg))
            .times(1)
            .returning(|_, _| Ok(()));
        provider
            .expect_send()
            .withf(|_, msg| {
                matches!(msg, OutboundMessage::Text { text, quoted: Some(q) }
                    if text == "⚠️ busy" && q.id == "7")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut resolver = MockMediaResolver::new();
        resolver.expect_fetch().returning(|_, _| MediaOutcome::Failure {
            message: "busy".to_string(),
        });

        let d = dispatcher(provider, resolver, Some(TARGET));
        let outcome = d.handle(inbound("7", TARGET, URL)).await?;
        assert_eq!(outcome, DispatchOutcome::Reported);
        Ok(())
    }

    #[tokio::test]
    async fn test_discard_rules() -> Result<(), ProviderError> {
        let mut provider = MockSessionProvider::new();
        provider.expect_send().never();
        let mut resolver = MockMediaResolver::new();
        resolver.expect_fetch().never();
        let d = dispatcher(provider, resolver, Some(TARGET));

        let mut from_self = inbound("1", TARGET, URL);
        from_self.from_self = true;
        assert_eq!(d.handle(from_self).await?, DispatchOutcome::Ignored);

        let other_chat = inbound("2", "-999", URL);
        assert_eq!(d.handle(other_chat).await?, DispatchOutcome::Ignored);

        let mut no_body = inbound("3", TARGET, URL);
        no_body.body = None;
        assert_eq!(d.handle(no_body).await?, DispatchOutcome::Ignored);

        let mut no_text = inbound("4", TARGET, URL);
        no_text.body = Some(MessageBody { text: None });
        assert_eq!(d.handle(no_text).await?, DispatchOutcome::Ignored);

        let chatter = inbound("5", TARGET, "hello world");
        assert_eq!(d.handle(chatter).await?, DispatchOutcome::NoCommand);

        let foreign = inbound("6", TARGET, "/video https://youtube.com/x");
        assert_eq!(d.handle(foreign).await?, DispatchOutcome::NoCommand);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_target_disables_dispatch() -> Result<(), ProviderError> {
        let mut provider = MockSessionProvider::new();
        provider.expect_send().never();
        let mut resolver = MockMediaResolver::new();
        resolver.expect_fetch().never();

        let d = dispatcher(provider, resolver, None);
        assert_eq!(
            d.handle(inbound("1", TARGET, URL)).await?,
            DispatchOutcome::Ignored
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_ack_aborts_cycle() {
        let mut provider = MockSessionProvider::new();
        provider
            .expect_send()
            .times(1)
            .returning(|_, _| Err(ProviderError::Send("flood".to_string())));
        let mut resolver = MockMediaResolver::new();
        resolver.expect_fetch().never();

        let d = dispatcher(provider, resolver, Some(TARGET));
        let result = d.handle(inbound("1", TARGET, URL)).await;
        assert!(matches!(result, Err(ProviderError::Send(_))));
    }
}
