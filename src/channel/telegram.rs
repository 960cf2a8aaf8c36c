// src/channel/telegram.rs

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::{error, info};

use super::{ChatTransport, InboundMessage, split_message};
use crate::error::{BotError, BotResult};
use crate::fetch::Artifact;
use crate::flow::MediaBot;

/// Telegram refuses text messages longer than this many characters.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Telegram transport. The session id of a conversation is its chat id.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

fn chat_id(session_id: &str) -> BotResult<ChatId> {
    session_id
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| BotError::Delivery(format!("`{session_id}` is not a telegram chat id")))
}

/// Builds the audio upload with title, performer and duration filled in.
fn audio_request(bot: &Bot, chat: ChatId, artifact: Artifact) -> <Bot as Requester>::SendAudio {
    let Artifact {
        descriptor,
        payload,
        file_name,
    } = artifact;

    let mut request = bot
        .send_audio(chat, InputFile::memory(payload).file_name(file_name))
        .title(descriptor.title);
    if let Some(author) = descriptor.author {
        request = request.performer(author);
    }
    if let Some(secs) = descriptor.duration_secs {
        request = request.duration(secs);
    }
    request
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, session_id: &str, text: &str) -> BotResult<()> {
        let chat = chat_id(session_id)?;
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            self.bot
                .send_message(chat, chunk)
                .send()
                .await
                .map_err(|e| BotError::Delivery(format!("telegram send text: {e}")))?;
        }
        Ok(())
    }

    async fn send_audio(&self, session_id: &str, artifact: Artifact) -> BotResult<()> {
        let chat = chat_id(session_id)?;
        audio_request(&self.bot, chat, artifact)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| BotError::Delivery(format!("telegram send audio: {e}")))
    }

    async fn send_document(&self, session_id: &str, artifact: Artifact) -> BotResult<()> {
        let chat = chat_id(session_id)?;
        let input = InputFile::memory(artifact.payload).file_name(artifact.file_name);

        self.bot
            .send_document(chat, input)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| BotError::Delivery(format!("telegram send document: {e}")))
    }
}

/// Polls Telegram for updates and feeds every text message to `core`.
///
/// teloxide handles updates of one chat in order and different chats
/// concurrently; `MediaBot` adds its own per-session lock on top.
pub async fn run_polling(transport: TelegramTransport, core: Arc<MediaBot>) {
    let handler = Update::filter_message().endpoint(
        |msg: Message, core: Arc<MediaBot>| async move {
            match msg.text() {
                Some(text) => {
                    let session_id = msg.chat.id.to_string();
                    core.handle(&session_id, InboundMessage::parse(text)).await;
                }
                None => info!(chat = %msg.chat.id, "ignoring non-text message"),
            }
            // dptree requires an Ok(()) return
            Ok::<(), Infallible>(())
        },
    );

    info!("telegram polling started");
    Dispatcher::builder(transport.bot().clone(), handler)
        .dependencies(dptree::deps![core])
        .build()
        .dispatch()
        .await;
    error!("telegram dispatcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_uploads_carry_track_metadata() {
        use crate::search::ResultDescriptor;
        use teloxide::requests::HasPayload;

        let transport = TelegramTransport::new("123:abc");
        let track = ResultDescriptor::audio("u", "Song", Some("Band".into()), Some(215));
        let request = audio_request(transport.bot(), ChatId(1), Artifact::new(track, vec![1, 2]));

        let payload = request.payload_ref();
        assert_eq!(payload.title.as_deref(), Some("Song"));
        assert_eq!(payload.performer.as_deref(), Some("Band"));
        assert_eq!(payload.duration, Some(215));
    }

    #[test]
    fn session_ids_are_chat_ids() {
        assert_eq!(chat_id("-100123").unwrap(), ChatId(-100123));
        assert!(matches!(chat_id("abc"), Err(BotError::Delivery(_))));
    }
}
