//! Command parser
//!
//! Recognizes `/video <url>`, `/music <url>` and bare platform links in
//! inbound message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain marker every accepted URL must contain.
pub const PLATFORM_MARKER: &str = "tiktok.com/";

const VIDEO_PREFIXES: &[&str] = &["/video"];
const MUSIC_PREFIXES: &[&str] = &["/music", "/musik"];

/// Media flavour requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Playable video with caption.
    Video,
    /// Audio track only.
    Music,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Music => f.write_str("music"),
        }
    }
}

/// A parsed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Requested media kind.
    pub kind: MediaKind,
    /// Target URL, always containing [`PLATFORM_MARKER`].
    pub url: String,
}

/// Parse inbound text into a [`Command`].
///
/// Rules are evaluated in order and the first match wins:
/// 1. a video prefix followed by whitespace,
/// 2. a music prefix followed by whitespace,
/// 3. any text containing [`PLATFORM_MARKER`] (implicit video).
///
/// A prefix followed by a URL without the marker yields `None`.
///
/// # Examples
///
/// ```
/// use cliprelay_core::command::{parse, MediaKind};
///
/// let cmd = parse("/music https://vt.tiktok.com/ZS123/").unwrap();
/// assert_eq!(cmd.kind, MediaKind::Music);
/// assert!(parse("hello world").is_none());
/// ```
#[must_use]
pub fn parse(text: &str) -> Option<Command> {
    let (kind, url) = if let Some(rest) = strip_any_prefix(text, VIDEO_PREFIXES) {
        (MediaKind::Video, rest.trim())
    } else if let Some(rest) = strip_any_prefix(text, MUSIC_PREFIXES) {
        (MediaKind::Music, rest.trim())
    } else if text.contains(PLATFORM_MARKER) {
        (MediaKind::Video, text)
    } else {
        return None;
    };

    if !url.contains(PLATFORM_MARKER) {
        return None;
    }

    Some(Command {
        kind,
        url: url.to_string(),
    })
}

/// Strip the first matching prefix when it is followed by whitespace.
fn strip_any_prefix<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|prefix| {
        let rest = text.strip_prefix(prefix)?;
        rest.starts_with(char::is_whitespace).then_some(rest)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_prefix() {
        let cmd = parse("/video   https://www.tiktok.com/@a/video/1  ");
        assert_eq!(
            cmd,
            Some(Command {
                kind: MediaKind::Video,
                url: "https://www.tiktok.com/@a/video/1".to_string(),
            })
        );
    }

    #[test]
    fn test_music_prefix_and_alias() {
        let music = parse("/music https://vt.tiktok.com/ZS1/");
        assert_eq!(music.map(|c| c.kind), Some(MediaKind::Music));

        let alias = parse("/musik https://vt.tiktok.com/ZS1/");
        assert_eq!(alias.map(|c| c.kind), Some(MediaKind::Music));
    }

    #[test]
    fn test_implicit_video_keeps_full_text() {
        let text = "check this out, https://vt.tiktok.com/xyz";
        let cmd = parse(text);
        assert_eq!(cmd.as_ref().map(|c| c.kind), Some(MediaKind::Video));
        assert_eq!(cmd.map(|c| c.url), Some(text.to_string()));
    }

    #[test]
    fn test_no_command() {
        assert_eq!(parse("hello world"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn test_prefix_with_foreign_url_is_ignored() {
        assert_eq!(parse("/video https://youtube.com/watch?v=1"), None);
        assert_eq!(parse("/music https://example.com/a.mp3"), None);
    }

    #[test]
    fn test_prefix_requires_whitespace() {
        // Falls through to the implicit rule and keeps the whole text.
        let cmd = parse("/videohttps://tiktok.com/1");
        assert_eq!(cmd.map(|c| c.url), Some("/videohttps://tiktok.com/1".to_string()));

        assert_eq!(parse("/video"), None);
    }

    #[test]
    fn test_video_prefix_wins_over_music_text() {
        let cmd = parse("/video https://tiktok.com/@x/music/2");
        assert_eq!(cmd.map(|c| c.kind), Some(MediaKind::Video));
    }
}
