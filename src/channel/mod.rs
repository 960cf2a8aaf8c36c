// src/channel/mod.rs

use async_trait::async_trait;

use crate::error::BotResult;
use crate::fetch::Artifact;

pub mod telegram;

pub use telegram::TelegramTransport;

/// Outbound side of the chat platform. Sessions are addressed by their id.
///
/// Artifacts are handed over by value: the transport consumes them and
/// nothing keeps a copy after delivery.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, session_id: &str, text: &str) -> BotResult<()>;
    async fn send_audio(&self, session_id: &str, artifact: Artifact) -> BotResult<()>;
    async fn send_document(&self, session_id: &str, artifact: Artifact) -> BotResult<()>;
}

/// An inbound chat message, classified as command or free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `/name` with any `@botname` suffix stripped; `raw` keeps the original text.
    Command { name: String, raw: String },
    Text(String),
}

impl InboundMessage {
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return InboundMessage::Text(text.to_string());
        };
        let token = rest.split(char::is_whitespace).next().unwrap_or_default();
        let name = token.split('@').next().unwrap_or_default();

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return InboundMessage::Text(text.to_string());
        }
        InboundMessage::Command {
            name: name.to_ascii_lowercase(),
            raw: text.to_string(),
        }
    }

    pub fn command(name: &str) -> Self {
        InboundMessage::Command {
            name: name.to_string(),
            raw: format!("/{name}"),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        InboundMessage::Text(text.into())
    }

    /// The message exactly as the user typed it.
    pub fn raw(&self) -> &str {
        match self {
            InboundMessage::Command { raw, .. } => raw,
            InboundMessage::Text(text) => text,
        }
    }
}

/// Splits `text` into chunks of at most `max_chars` characters, preferring
/// to break after a newline.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();

    while rest.len() > max_chars {
        let window = &rest[..max_chars];
        let cut = window
            .iter()
            .rposition(|c| *c == '\n')
            .map(|pos| pos + 1)
            .filter(|pos| *pos > max_chars / 2)
            .unwrap_or(max_chars);
        chunks.push(rest[..cut].iter().collect());
        rest.drain(..cut);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.into_iter().collect());
    }
    chunks
}
