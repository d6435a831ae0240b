use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use tgfetch_core::core::events::MessageHandle;

use crate::models::download::DownloadTask;
use crate::models::media::{FormatRequest, MediaClass};
use crate::platforms::telegram::models::{InlineKeyboardButton, InlineKeyboardMarkup, Message};
use crate::AppState;

const CALLBACK_PREFIX: &str = "dl";
const MAX_CALLBACK_BYTES: usize = 64;
const MAX_PENDING: usize = 512;

/// URLs waiting for a format choice. Callback data is capped at 64 bytes,
/// so buttons carry a short id instead of the URL.
pub struct PendingRequests {
    inner: Mutex<PendingInner>,
    capacity: usize,
}

struct PendingInner {
    next_id: u64,
    urls: HashMap<u64, String>,
    order: VecDeque<u64>,
}

impl PendingRequests {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                next_id: 1,
                urls: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, url: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.urls.insert(id, url.to_string());
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.urls.remove(&old);
            }
        }
        id
    }

    /// Entries stay after lookup so the same prompt can be answered twice
    /// (video and then audio, say).
    pub fn get(&self, id: u64) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.urls.get(&id).cloned()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new(MAX_PENDING)
    }
}

/// `dl:<id>:video`, `dl:<id>:audio`, or `dl:<id>:v=<format>` / `a=<format>`
/// for an explicit format of the given class.
pub fn callback_data(pending_id: u64, request: &FormatRequest) -> String {
    let choice = match request {
        FormatRequest::Video => "video".to_string(),
        FormatRequest::Audio => "audio".to_string(),
        FormatRequest::Format { id, class } => match class {
            MediaClass::Video => format!("v={}", id),
            MediaClass::Audio => format!("a={}", id),
        },
    };
    format!("{}:{}:{}", CALLBACK_PREFIX, pending_id, choice)
}

pub fn fits_callback(data: &str) -> bool {
    data.len() <= MAX_CALLBACK_BYTES
}

pub fn parse_callback_data(data: &str) -> Option<(u64, FormatRequest)> {
    let mut parts = data.splitn(3, ':');
    if parts.next()? != CALLBACK_PREFIX {
        return None;
    }
    let id: u64 = parts.next()?.parse().ok()?;
    let choice = parts.next()?;

    let request = match choice {
        "video" => FormatRequest::Video,
        "audio" => FormatRequest::Audio,
        other => {
            let (tag, format_id) = other.split_once('=')?;
            if format_id.is_empty() {
                return None;
            }
            let class = match tag {
                "v" => MediaClass::Video,
                "a" => MediaClass::Audio,
                _ => return None,
            };
            FormatRequest::Format {
                id: format_id.to_string(),
                class,
            }
        }
    };
    Some((id, request))
}

pub fn validate_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Some(parsed.to_string()),
        _ => None,
    }
}

pub fn choice_keyboard(pending_id: u64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::rows(vec![
        vec![InlineKeyboardButton::new(
            "🎥 Video (MP4)",
            callback_data(pending_id, &FormatRequest::Video),
        )],
        vec![InlineKeyboardButton::new(
            "🎵 Audio (MP3)",
            callback_data(pending_id, &FormatRequest::Audio),
        )],
    ])
}

pub async fn handle_download(
    state: &Arc<AppState>,
    chat_id: i64,
    arg: Option<&str>,
) -> anyhow::Result<()> {
    let Some(url) = arg.and_then(validate_url) else {
        state
            .api
            .send_message(chat_id, "❗ Please provide a valid link: /download <url>", None)
            .await?;
        return Ok(());
    };

    let pending_id = state.pending.insert(&url);
    state
        .api
        .send_message(
            chat_id,
            "🔽 Choose a download format:",
            Some(&choice_keyboard(pending_id)),
        )
        .await?;
    Ok(())
}

/// A button was pressed: turn the prompt into the task's status message and
/// hand the task to the coordinator.
pub async fn handle_choice(
    state: &Arc<AppState>,
    query_id: &str,
    message: &Message,
    pending_id: u64,
    request: FormatRequest,
) -> anyhow::Result<()> {
    let Some(url) = state.pending.get(pending_id) else {
        state
            .api
            .answer_callback_query(query_id, Some("This request has expired, send the link again."))
            .await?;
        return Ok(());
    };
    state.api.answer_callback_query(query_id, None).await?;

    let chat_id = message.chat.id;
    let status = state
        .api
        .send_message(chat_id, &format!("🎬 Starting {} download...", request.label()), None)
        .await?;

    let task_id = Uuid::new_v4();
    let dest_dir = match state.temp_paths.allocate(task_id).await {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!("cannot create task dir for {}: {}", task_id, e);
            state
                .api
                .edit_message_text(chat_id, status.message_id, "❌ Could not prepare a download folder.", None)
                .await?;
            return Ok(());
        }
    };

    let task = DownloadTask::new(task_id, url, request, chat_id, dest_dir).with_status_message(
        MessageHandle {
            chat_id: status.chat.id,
            message_id: status.message_id,
        },
    );

    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        let report = coordinator.run(task).await;
        tracing::info!(
            "task {} finished as {} (recovered: {})",
            report.task_id,
            report.state.name(),
            report.recovered_after_timeout
        );
    });
    Ok(())
}
