use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::io::ReaderStream;

use tgfetch_core::core::events::FileKind;

use super::models::{ApiResponse, InlineKeyboardMarkup, Message, Update};
use crate::models::media::file_name_of;

const NOT_MODIFIED: &str = "message is not modified";

/// Minimal Bot API client over HTTPS long polling.
pub struct BotApi {
    client: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(api_base: &str, token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> anyhow::Result<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow!("{} request failed: {}", method, e.without_url()))?;
        decode(method, response).await
    }

    pub async fn get_updates(&self, offset: i64, poll_timeout_secs: u64) -> anyhow::Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call(
            "getUpdates",
            &body,
            Duration::from_secs(poll_timeout_secs + 10),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> anyhow::Result<Message> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::to_value(kb)?;
        }
        self.call("sendMessage", &body, Duration::from_secs(30)).await
    }

    /// Edits a message's text. Leaving out `keyboard` removes any buttons.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> anyhow::Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::to_value(kb)?;
        }
        match self
            .call::<serde_json::Value>("editMessageText", &body, Duration::from_secs(30))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains(NOT_MODIFIED) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> anyhow::Result<()> {
        let mut body = json!({ "callback_query_id": id });
        if let Some(t) = text {
            body["text"] = json!(t);
        }
        self.call::<bool>("answerCallbackQuery", &body, Duration::from_secs(15))
            .await
            .map(|_| ())
    }

    /// Uploads a file from disk, streamed rather than read into memory.
    pub async fn send_file(
        &self,
        chat_id: i64,
        kind: FileKind,
        path: &Path,
        caption: Option<&str>,
    ) -> anyhow::Result<Message> {
        let (method, field) = upload_method(kind);

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| anyhow!("cannot open {:?}: {}", path, e))?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len).file_name(file_name_of(path));

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, part);
        if let Some(c) = caption {
            form = form.text("caption", c.to_string());
        }
        if kind == FileKind::Video {
            form = form.text("supports_streaming", "true");
        }

        tracing::debug!("{} {:?} ({} bytes) to chat {}", method, path, len, chat_id);
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow!("{} request failed: {}", method, e.without_url()))?;
        decode(method, response).await
    }
}

fn upload_method(kind: FileKind) -> (&'static str, &'static str) {
    match kind {
        FileKind::Audio => ("sendAudio", "audio"),
        FileKind::Video => ("sendVideo", "video"),
        FileKind::Document => ("sendDocument", "document"),
    }
}

async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> anyhow::Result<T> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| anyhow!("{} response failed: {}", method, e.without_url()))?;
    let parsed: ApiResponse<T> = serde_json::from_slice(&bytes)
        .map_err(|e| anyhow!("{} returned HTTP {} with invalid JSON: {}", method, status, e))?;
    unwrap_response(method, parsed)
}

fn unwrap_response<T>(method: &str, parsed: ApiResponse<T>) -> anyhow::Result<T> {
    if !parsed.ok {
        return Err(anyhow!(
            "{} failed ({}): {}",
            method,
            parsed.error_code.unwrap_or_default(),
            parsed.description.unwrap_or_else(|| "no description".into())
        ));
    }
    parsed
        .result
        .ok_or_else(|| anyhow!("{} returned no result", method))
}
