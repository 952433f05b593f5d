//! Media Resolver API client
//!
//! Turns a platform URL into a playable media URL. Every failure is folded
//! into [`MediaOutcome::Failure`] so callers never handle transport errors.

use crate::command::MediaKind;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Reply text when the API reports an error without a message.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to get data from the media resolver.";
/// Reply text when the API cannot be reached.
pub const CONNECTIVITY_FAILURE_MESSAGE: &str =
    "Something went wrong while connecting to the media resolver server.";

/// Caption attached to a resolved video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    /// Author display name.
    pub author: String,
    /// Media title.
    pub title: String,
}

/// Result of a fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOutcome {
    /// Media resolved.
    Success {
        /// Kind that was requested and resolved.
        kind: MediaKind,
        /// Playable URL.
        url: String,
        /// Author and title.
        caption: Caption,
    },
    /// Media could not be resolved; `message` is shown to the user.
    Failure {
        /// Human-readable reason.
        message: String,
    },
}

impl MediaOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }
}

/// Anything that can resolve a platform URL into media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve `url` for the requested `kind`. Never fails.
    async fn fetch(&self, url: &str, kind: MediaKind) -> MediaOutcome;
}

#[derive(Debug, Deserialize)]
struct ResolverResponse {
    #[serde(default = "missing_code")]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<ResolverData>,
}

const fn missing_code() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct ResolverData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: ResolverAuthor,
    #[serde(default)]
    play: Option<String>,
    #[serde(default)]
    music: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolverAuthor {
    #[serde(default)]
    nickname: String,
}

/// HTTP client for the Media Resolver API.
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    client: Client,
    endpoint: String,
}

impl MediaFetcher {
    /// Create a fetcher for `endpoint` with an optional request timeout.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {e}");
            Client::new()
        });

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl MediaResolver for MediaFetcher {
    async fn fetch(&self, url: &str, kind: MediaKind) -> MediaOutcome {
        let request = self
            .client
            .post(&self.endpoint)
            .form(&[("url", url), ("hd", "1")]);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(endpoint = %self.endpoint, "Media resolver unreachable: {e}");
                return MediaOutcome::failure(CONNECTIVITY_FAILURE_MESSAGE);
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                error!(%status, "Failed to read media resolver response: {e}");
                return MediaOutcome::failure(CONNECTIVITY_FAILURE_MESSAGE);
            }
        };

        debug!(%status, bytes = body.len(), "Media resolver responded");
        outcome_from_body(status.is_success(), &body, kind)
    }
}

/// Normalize a raw response body into an outcome.
fn outcome_from_body(success_status: bool, body: &[u8], kind: MediaKind) -> MediaOutcome {
    match serde_json::from_slice::<ResolverResponse>(body) {
        Ok(parsed) => outcome_from_response(parsed, kind),
        Err(e) if success_status => {
            warn!("Malformed media resolver response: {e}");
            MediaOutcome::failure(GENERIC_FAILURE_MESSAGE)
        }
        Err(e) => {
            error!("Media resolver error status with unparseable body: {e}");
            MediaOutcome::failure(CONNECTIVITY_FAILURE_MESSAGE)
        }
    }
}

fn outcome_from_response(response: ResolverResponse, kind: MediaKind) -> MediaOutcome {
    let data = match response.data {
        Some(data) if response.code == 0 => data,
        _ => {
            let message = response
                .msg
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
            return MediaOutcome::failure(message);
        }
    };

    let caption = Caption {
        author: data.author.nickname,
        title: data.title,
    };
    let url = match kind {
        MediaKind::Video => data.play,
        MediaKind::Music => data.music,
    };

    match url.filter(|u| !u.is_empty()) {
        Some(url) => MediaOutcome::Success { kind, url, caption },
        None => MediaOutcome::failure(format!(
            "Failed, the {kind} format is not available for this post."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "code": 0,
        "msg": "success",
        "data": {
            "title": "cat video",
            "author": {"nickname": "Kitty"},
            "play": "https://cdn.example/play.mp4",
            "music": "https://cdn.example/music.mp3"
        }
    }"#;

    #[test]
    fn test_success_video() {
        let outcome = outcome_from_body(true, FULL.as_bytes(), MediaKind::Video);
        assert_eq!(
            outcome,
            MediaOutcome::Success {
                kind: MediaKind::Video,
                url: "https://cdn.example/play.mp4".to_string(),
                caption: Caption {
                    author: "Kitty".to_string(),
                    title: "cat video".to_string(),
                },
            }
        );
    }

    #[test]
    fn test_success_music() {
        let outcome = outcome_from_body(true, FULL.as_bytes(), MediaKind::Music);
        assert!(matches!(
            outcome,
            MediaOutcome::Success { kind: MediaKind::Music, ref url, .. }
                if url == "https://cdn.example/music.mp3"
        ));
    }

    #[test]
    fn test_missing_field_names_format() {
        let body = r#"{"code":0,"data":{"title":"t","author":{"nickname":"n"},"music":""}}"#;

        let video = outcome_from_body(true, body.as_bytes(), MediaKind::Video);
        assert!(matches!(video, MediaOutcome::Failure { ref message } if message.contains("video")));

        // Empty string counts as absent
        let music = outcome_from_body(true, body.as_bytes(), MediaKind::Music);
        assert!(matches!(music, MediaOutcome::Failure { ref message } if message.contains("music")));
    }

    #[test]
    fn test_error_code_uses_api_message() {
        let body = r#"{"code":-1,"msg":"Url parsing is failed! Please check url."}"#;
        let outcome = outcome_from_body(true, body.as_bytes(), MediaKind::Video);
        assert_eq!(
            outcome,
            MediaOutcome::Failure {
                message: "Url parsing is failed! Please check url.".to_string()
            }
        );
    }

    #[test]
    fn test_error_without_message_falls_back() {
        let outcome = outcome_from_body(true, br#"{"code":-1}"#, MediaKind::Video);
        assert_eq!(outcome, MediaOutcome::failure(GENERIC_FAILURE_MESSAGE));

        let outcome = outcome_from_body(true, b"<html>oops</html>", MediaKind::Video);
        assert_eq!(outcome, MediaOutcome::failure(GENERIC_FAILURE_MESSAGE));
    }

    #[test]
    fn test_error_status_without_body_is_connectivity() {
        let outcome = outcome_from_body(false, b"Bad Gateway", MediaKind::Music);
        assert_eq!(outcome, MediaOutcome::failure(CONNECTIVITY_FAILURE_MESSAGE));
    }

    #[test]
    fn test_error_status_with_body_uses_api_message() {
        let outcome = outcome_from_body(false, br#"{"code":-1,"msg":"busy"}"#, MediaKind::Video);
        assert_eq!(outcome, MediaOutcome::failure("busy"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connectivity_failure() {
        // Port 1 on loopback refuses connections
        let fetcher = MediaFetcher::new(
            "http://127.0.0.1:1/api/",
            Some(Duration::from_secs(5)),
        );
        let outcome = fetcher
            .fetch("https://vt.tiktok.com/ZS1/", MediaKind::Video)
            .await;
        assert_eq!(outcome, MediaOutcome::failure(CONNECTIVITY_FAILURE_MESSAGE));
    }
}
