pub mod api;
pub mod models;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use tgfetch_core::core::events::{FileKind, MessageHandle, Messenger};

use api::BotApi;

/// `Messenger` backed by the Bot API.
pub struct TelegramMessenger {
    api: Arc<BotApi>,
}

impl TelegramMessenger {
    pub fn new(api: Arc<BotApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_status(&self, chat_id: i64, text: &str) -> anyhow::Result<MessageHandle> {
        let msg = self.api.send_message(chat_id, text, None).await?;
        Ok(MessageHandle {
            chat_id: msg.chat.id,
            message_id: msg.message_id,
        })
    }

    async fn update_status(&self, handle: &MessageHandle, text: &str) -> anyhow::Result<()> {
        self.api
            .edit_message_text(handle.chat_id, handle.message_id, text, None)
            .await
    }

    async fn send_file(
        &self,
        chat_id: i64,
        kind: FileKind,
        path: &Path,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.api.send_file(chat_id, kind, path, caption).await?;
        Ok(())
    }
}
