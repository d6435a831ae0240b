use std::sync::Arc;

use crate::commands::downloads::{callback_data, choice_keyboard, fits_callback, validate_url};
use crate::models::media::{FormatInfo, FormatRequest, MediaClass};
use crate::platforms::telegram::models::{InlineKeyboardButton, InlineKeyboardMarkup};
use crate::AppState;

const MAX_LISTED: usize = 20;
const MAX_FORMAT_BUTTONS: usize = 8;
const BUTTONS_PER_ROW: usize = 2;

pub async fn handle_formats(
    state: &Arc<AppState>,
    chat_id: i64,
    arg: Option<&str>,
) -> anyhow::Result<()> {
    let Some(url) = arg.and_then(validate_url) else {
        state
            .api
            .send_message(chat_id, "❗ Please provide a valid link: /formats <url>", None)
            .await?;
        return Ok(());
    };

    let status = state
        .api
        .send_message(chat_id, "🔎 Looking up formats...", None)
        .await?;

    let formats = match state.resolver.list_formats(&url).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("listing formats for {} failed: {:#}", url, e);
            state
                .api
                .edit_message_text(chat_id, status.message_id, "❌ Could not list formats for this link.", None)
                .await?;
            return Ok(());
        }
    };

    let pending_id = state.pending.insert(&url);
    let text = render_format_list(&formats);
    let keyboard = format_keyboard(pending_id, &formats);
    state
        .api
        .edit_message_text(chat_id, status.message_id, &text, Some(&keyboard))
        .await
}

/// Class a listed format would be delivered as.
pub fn class_of(format: &FormatInfo) -> Option<MediaClass> {
    if format.has_video() {
        Some(MediaClass::Video)
    } else if format.has_audio() {
        Some(MediaClass::Audio)
    } else {
        None
    }
}

pub fn describe_format(f: &FormatInfo) -> String {
    let kind = match (f.has_video(), f.height) {
        (true, Some(h)) => format!("{}p", h),
        (true, None) => "video".to_string(),
        (false, _) if f.has_audio() => "audio only".to_string(),
        _ => "unknown".to_string(),
    };

    let codecs = match (f.has_video(), f.has_audio()) {
        (true, true) => format!("{} + {}", codec_short(&f.vcodec), codec_short(&f.acodec)),
        (true, false) => format!("{}, no audio", codec_short(&f.vcodec)),
        (false, true) => codec_short(&f.acodec),
        (false, false) => "-".to_string(),
    };

    let size = f
        .filesize
        .map(|b| format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)))
        .unwrap_or_else(|| "? MB".to_string());

    format!("{} · {} · {} · {} · {}", f.format_id, f.ext, kind, codecs, size)
}

fn codec_short(codec: &Option<String>) -> String {
    codec
        .as_deref()
        .and_then(|c| c.split('.').next())
        .unwrap_or("?")
        .to_string()
}

pub fn render_format_list(formats: &[FormatInfo]) -> String {
    if formats.is_empty() {
        return "No formats were reported for this link. You can still try the buttons below."
            .to_string();
    }

    let mut out = String::from("📋 Available formats:\n\n");
    for f in formats.iter().rev().take(MAX_LISTED) {
        out.push_str(&describe_format(f));
        out.push('\n');
    }
    if formats.len() > MAX_LISTED {
        out.push_str(&format!("\n… and {} more", formats.len() - MAX_LISTED));
    }
    out
}

/// One button per downloadable format, best first, then the two generic
/// choices.
pub fn format_keyboard(pending_id: u64, formats: &[FormatInfo]) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = formats
        .iter()
        .rev()
        .filter_map(|f| {
            let class = class_of(f)?;
            let request = FormatRequest::Format {
                id: f.format_id.clone(),
                class,
            };
            let data = callback_data(pending_id, &request);
            if !fits_callback(&data) {
                return None;
            }
            let label = match (class, f.height) {
                (MediaClass::Video, Some(h)) => format!("🎞 {} ({}p)", f.format_id, h),
                (MediaClass::Video, None) => format!("🎞 {}", f.format_id),
                (MediaClass::Audio, _) => format!("🎧 {}", f.format_id),
            };
            Some(InlineKeyboardButton::new(label, data))
        })
        .take(MAX_FORMAT_BUTTONS)
        .collect();

    let mut rows: Vec<Vec<InlineKeyboardButton>> = buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|c| c.to_vec())
        .collect();
    rows.extend(choice_keyboard(pending_id).inline_keyboard);
    InlineKeyboardMarkup::rows(rows)
}
